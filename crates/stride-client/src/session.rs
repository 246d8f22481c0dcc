use std::fmt;

use stride_types::api::AuthResponse;
use stride_types::models::UserProfile;
use uuid::Uuid;

/// An authenticated session: the bearer credential plus a snapshot of the
/// signed-in profile. Lives in memory only.
#[derive(Clone)]
pub struct Session {
    token: String,
    user: UserProfile,
}

impl Session {
    pub fn new(token: impl Into<String>, user: UserProfile) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    /// Replaces the profile snapshot, e.g. after `GET /auth/me`. Profiles of
    /// other users are ignored.
    pub fn refresh(&mut self, profile: UserProfile) -> bool {
        if profile.id != self.user.id {
            return false;
        }
        self.user = profile;
        true
    }
}

impl From<AuthResponse> for Session {
    fn from(resp: AuthResponse) -> Self {
        Self::new(resp.token, resp.user)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user.username)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stride_types::models::FitnessLevel;

    fn profile(id: Uuid, display_name: &str) -> UserProfile {
        UserProfile {
            id,
            username: "rio".into(),
            display_name: display_name.into(),
            bio: String::new(),
            fitness_level: FitnessLevel::Beginner,
            interests: vec![],
            onboarded: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn refresh_only_accepts_the_same_user() {
        let id = Uuid::new_v4();
        let mut session = Session::new("t0k3n", profile(id, "Rio"));

        assert!(!session.refresh(profile(Uuid::new_v4(), "Someone")));
        assert_eq!(session.user().display_name, "Rio");

        assert!(session.refresh(profile(id, "Rio R.")));
        assert_eq!(session.user().display_name, "Rio R.");
    }

    #[test]
    fn debug_output_hides_the_token() {
        let session = Session::new("t0k3n", profile(Uuid::new_v4(), "Rio"));
        assert!(!format!("{:?}", session).contains("t0k3n"));
    }
}
