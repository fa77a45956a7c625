//! Athlete profile and leaderboard preference.

use serde::{Deserialize, Serialize};

/// Athlete record as far as leaderboards are concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Strava athlete ID (also used as document ID)
    pub athlete_id: u64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
    /// Leaderboard opt-in; athletes are opted in unless they say otherwise
    #[serde(default = "default_show_on_leaderboards")]
    pub show_on_leaderboards: bool,
    /// Preferred time zone (Strava format or IANA name)
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_show_on_leaderboards() -> bool {
    true
}

impl User {
    pub fn new(athlete_id: u64, display_name: impl Into<String>) -> Self {
        Self {
            athlete_id,
            display_name: display_name.into(),
            profile_picture: None,
            show_on_leaderboards: true,
            timezone: None,
        }
    }
}

/// Whether an athlete appears on leaderboards. Athletes without a stored
/// record are opted in.
pub fn is_opted_in(user: Option<&User>) -> bool {
    user.map_or(true, |u| u.show_on_leaderboards)
}
