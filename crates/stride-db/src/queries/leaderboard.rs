use anyhow::Result;
use stride_types::models::{COMPLETED_GOAL_BONUS, LeaderboardEntry};

use crate::Database;

impl Database {
    // -- Leaderboard --

    /// Users ranked by score (`check_ins + bonus * completed_goals`). Equal
    /// scores share a rank and the next rank skips accordingly.
    pub fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, display_name, check_ins, completed_goals,
                        check_ins + ?1 * completed_goals AS score
                 FROM (
                     SELECT u.id, u.username, u.display_name,
                            (SELECT COUNT(*) FROM check_ins ci WHERE ci.user_id = u.id) AS check_ins,
                            (SELECT COUNT(*) FROM goals g
                             WHERE g.owner_id = u.id AND g.status = 'completed') AS completed_goals
                     FROM users u
                 )
                 ORDER BY score DESC, check_ins DESC, username ASC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map((COMPLETED_GOAL_BONUS, limit), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(rows.len());
            for (position, (id, username, display_name, check_ins, completed_goals, score)) in
                rows.into_iter().enumerate()
            {
                let rank = match entries.last() {
                    Some(prev) if prev.score == score => prev.rank,
                    _ => position as u32 + 1,
                };
                entries.push(LeaderboardEntry {
                    rank,
                    user_id: id.parse()?,
                    username,
                    display_name,
                    check_ins,
                    completed_goals,
                    score,
                });
            }
            Ok(entries)
        })
    }
}
