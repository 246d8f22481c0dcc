use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use stride_types::api::{CreateGoalRequest, UpdateGoalRequest};
use stride_types::models::{CheckIn, Goal, GoalStatus};
use uuid::Uuid;

use super::OptionalExt;
use crate::models::{CheckInRow, GoalRow};
use crate::{Database, now};

const GOAL_COLUMNS: &str = "id, owner_id, title, description, category, frequency,
    target_check_ins, completed_check_ins, status, created_at, completed_at";

/// Result of recording a check-in against a goal.
#[derive(Debug)]
pub enum CheckInOutcome {
    Recorded { goal: Goal, check_in: CheckIn },
    /// The goal does not exist or belongs to someone else.
    NotFound,
    /// The goal already reached its target.
    AlreadyCompleted,
    /// The goal already has a check-in for this day/week.
    DuplicatePeriod,
}

impl Database {
    // -- Goals --

    pub fn create_goal(&self, owner_id: Uuid, req: &CreateGoalRequest) -> Result<Goal> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO goals (id, owner_id, title, description, category, frequency,
                                    target_check_ins, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.to_string(),
                    owner_id.to_string(),
                    req.title.trim(),
                    req.description,
                    req.category.trim(),
                    req.frequency.as_str(),
                    req.target_check_ins,
                    now(),
                ],
            )?;
            query_goal(conn, owner_id, id)?
                .ok_or_else(|| anyhow::anyhow!("Goal vanished after insert: {}", id))
        })
    }

    /// Goals owned by `owner_id`, newest first, optionally filtered by status.
    pub fn list_goals(&self, owner_id: Uuid, status: Option<GoalStatus>) -> Result<Vec<Goal>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM goals
                 WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC",
                GOAL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![owner_id.to_string(), status.map(|s| s.as_str())],
                    read_goal_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(GoalRow::into_goal).collect()
        })
    }

    pub fn get_goal(&self, owner_id: Uuid, goal_id: Uuid) -> Result<Option<Goal>> {
        self.with_conn(|conn| query_goal(conn, owner_id, goal_id))
    }

    /// Updates the provided fields. Lowering the target to or below the number
    /// of check-ins already recorded completes the goal.
    pub fn update_goal(
        &self,
        owner_id: Uuid,
        goal_id: Uuid,
        req: &UpdateGoalRequest,
    ) -> Result<Option<Goal>> {
        self.with_conn_mut(|conn| {
            let Some(mut goal) = query_goal(conn, owner_id, goal_id)? else {
                return Ok(None);
            };

            if let Some(title) = &req.title {
                goal.title = title.trim().to_string();
            }
            if let Some(description) = &req.description {
                goal.description = description.clone();
            }
            if let Some(category) = &req.category {
                goal.category = category.trim().to_string();
            }
            if let Some(target) = req.target_check_ins {
                goal.target_check_ins = target;
            }

            let completing =
                goal.status == GoalStatus::Active && goal.completed_check_ins >= goal.target_check_ins;

            conn.execute(
                "UPDATE goals SET title = ?3, description = ?4, category = ?5, target_check_ins = ?6
                 WHERE id = ?1 AND owner_id = ?2",
                rusqlite::params![
                    goal_id.to_string(),
                    owner_id.to_string(),
                    goal.title,
                    goal.description,
                    goal.category,
                    goal.target_check_ins,
                ],
            )?;
            if completing {
                mark_completed(conn, goal_id)?;
            }

            query_goal(conn, owner_id, goal_id)
        })
    }

    pub fn delete_goal(&self, owner_id: Uuid, goal_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM goals WHERE id = ?1 AND owner_id = ?2",
                (goal_id.to_string(), owner_id.to_string()),
            )?;
            Ok(n > 0)
        })
    }

    /// Records a check-in for the period containing `date`. Reaching the
    /// target transitions the goal to `completed`.
    pub fn record_check_in(
        &self,
        owner_id: Uuid,
        goal_id: Uuid,
        date: NaiveDate,
        note: Option<&str>,
    ) -> Result<CheckInOutcome> {
        self.with_conn_mut(|conn| {
            let Some(goal) = query_goal(conn, owner_id, goal_id)? else {
                return Ok(CheckInOutcome::NotFound);
            };
            if goal.status == GoalStatus::Completed {
                return Ok(CheckInOutcome::AlreadyCompleted);
            }

            let period = goal.frequency.period_key(date);
            let taken = conn
                .query_row(
                    "SELECT 1 FROM check_ins WHERE goal_id = ?1 AND period = ?2",
                    (goal_id.to_string(), &period),
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if taken {
                return Ok(CheckInOutcome::DuplicatePeriod);
            }

            let check_in_id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO check_ins (id, goal_id, user_id, period, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    check_in_id.to_string(),
                    goal_id.to_string(),
                    owner_id.to_string(),
                    period,
                    note,
                    now(),
                ],
            )?;
            conn.execute(
                "UPDATE goals SET completed_check_ins = completed_check_ins + 1 WHERE id = ?1",
                [goal_id.to_string()],
            )?;
            if goal.completed_check_ins + 1 >= goal.target_check_ins {
                mark_completed(conn, goal_id)?;
            }

            let goal = query_goal(conn, owner_id, goal_id)?
                .ok_or_else(|| anyhow::anyhow!("Goal vanished during check-in: {}", goal_id))?;
            let check_in = query_check_in(conn, check_in_id)?
                .ok_or_else(|| anyhow::anyhow!("Check-in vanished after insert: {}", check_in_id))?;
            Ok(CheckInOutcome::Recorded { goal, check_in })
        })
    }

    pub fn list_check_ins(&self, goal_id: Uuid) -> Result<Vec<CheckIn>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, goal_id, period, note, created_at FROM check_ins
                 WHERE goal_id = ?1 ORDER BY period",
            )?;
            let rows = stmt
                .query_map([goal_id.to_string()], read_check_in_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(CheckInRow::into_check_in).collect()
        })
    }
}

fn mark_completed(conn: &Connection, goal_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE goals SET status = 'completed', completed_at = ?2 WHERE id = ?1",
        (goal_id.to_string(), now()),
    )?;
    Ok(())
}

fn read_goal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GoalRow> {
    Ok(GoalRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        frequency: row.get(5)?,
        target_check_ins: row.get(6)?,
        completed_check_ins: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

fn read_check_in_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckInRow> {
    Ok(CheckInRow {
        id: row.get(0)?,
        goal_id: row.get(1)?,
        period: row.get(2)?,
        note: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_goal(conn: &Connection, owner_id: Uuid, goal_id: Uuid) -> Result<Option<Goal>> {
    let sql = format!("SELECT {} FROM goals WHERE id = ?1 AND owner_id = ?2", GOAL_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row((goal_id.to_string(), owner_id.to_string()), read_goal_row)
        .optional()?
        .map(GoalRow::into_goal)
        .transpose()
}

fn query_check_in(conn: &Connection, id: Uuid) -> Result<Option<CheckIn>> {
    conn.query_row(
        "SELECT id, goal_id, period, note, created_at FROM check_ins WHERE id = ?1",
        [id.to_string()],
        read_check_in_row,
    )
    .optional()?
    .map(CheckInRow::into_check_in)
    .transpose()
}
