//! Fixed genre → subgenre catalog used to validate games.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("unknown genre '{0}'")]
    UnknownGenre(String),
    #[error("subgenre '{subgenre}' is not valid for genre '{genre}'")]
    SubgenreMismatch { genre: String, subgenre: String },
    #[error("subgenre '{0}' requires a genre")]
    SubgenreWithoutGenre(String),
}

pub const GENRES: &[(&str, &[&str])] = &[
    (
        "RPG",
        &["Action-RPG", "JRPG", "CRPG", "MMORPG", "Tactical RPG", "Roguelike"],
    ),
    (
        "Shooter",
        &[
            "FPS",
            "TPS",
            "Battle-Royale",
            "Hero Shooter",
            "Tactical Shooter",
            "Extraction Shooter",
        ],
    ),
    (
        "Action",
        &[
            "Action-Adventure",
            "Hack and Slash",
            "Platformer",
            "Beat 'em up",
            "Stealth",
            "Survival Horror",
            "Soulslike",
        ],
    ),
    (
        "Strategy",
        &["RTS", "Turn-Based Strategy", "4X", "MOBA", "Tower Defense", "Auto Battler"],
    ),
    (
        "Fighting",
        &["2D Fighter", "3D Fighter", "Platform Fighter", "Arena Fighter"],
    ),
    (
        "Sports",
        &["Racing", "Football", "Basketball", "Soccer", "Golf", "Extreme Sports"],
    ),
    (
        "Simulation",
        &["Life Sim", "Farming Sim", "Flight Sim", "City Builder", "Management"],
    ),
    (
        "Puzzle",
        &["Match-3", "Physics Puzzle", "Logic Puzzle", "Puzzle Platformer"],
    ),
];

/// Validates a genre/subgenre pair and returns both in catalog spelling.
///
/// Blank strings count as absent. A genre alone is accepted; a subgenre
/// alone is not.
pub fn canonicalize(
    genre: Option<&str>,
    subgenre: Option<&str>,
) -> Result<(Option<&'static str>, Option<&'static str>), CategoryError> {
    let genre = genre.map(str::trim).filter(|g| !g.is_empty());
    let subgenre = subgenre.map(str::trim).filter(|s| !s.is_empty());

    let Some(genre) = genre else {
        return match subgenre {
            Some(sub) => Err(CategoryError::SubgenreWithoutGenre(sub.to_string())),
            None => Ok((None, None)),
        };
    };

    let (canonical_genre, subs) = GENRES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(genre))
        .ok_or_else(|| CategoryError::UnknownGenre(genre.to_string()))?;

    let canonical_sub = match subgenre {
        None => None,
        Some(sub) => Some(
            *subs
                .iter()
                .find(|candidate| candidate.eq_ignore_ascii_case(sub))
                .ok_or_else(|| CategoryError::SubgenreMismatch {
                    genre: canonical_genre.to_string(),
                    subgenre: sub.to_string(),
                })?,
        ),
    };

    Ok((Some(canonical_genre), canonical_sub))
}
