pub mod auth;
pub mod chat;
pub mod error;
pub mod goals;
pub mod leaderboard;
pub mod middleware;
pub mod partners;
pub mod posts;
pub mod users;
