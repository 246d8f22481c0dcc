use anyhow::Result;
use rusqlite::Connection;
use stride_types::models::{ConnectionStatus, PartnerConnection, PartnerSuggestion, UserProfile};
use uuid::Uuid;

use super::OptionalExt;
use super::users::{read_user_row, user_columns, user_exists};
use crate::models::{PartnerRow, UserRow};
use crate::{Database, now};

const PARTNER_COLUMNS: &str = "id, requester_id, recipient_id, status, created_at, responded_at";

#[derive(Debug)]
pub enum RequestOutcome {
    Created(PartnerConnection),
    SelfRequest,
    UnknownUser,
    /// A pending or accepted connection already links the pair.
    AlreadyExists,
}

#[derive(Debug)]
pub enum RespondOutcome {
    Updated(PartnerConnection),
    /// No such request addressed to this user.
    NotFound,
    NotPending,
}

impl Database {
    // -- Partner connections --

    pub fn create_partner_request(&self, requester_id: Uuid, recipient_id: Uuid) -> Result<RequestOutcome> {
        if requester_id == recipient_id {
            return Ok(RequestOutcome::SelfRequest);
        }
        self.with_conn_mut(|conn| {
            if !user_exists(conn, recipient_id)? {
                return Ok(RequestOutcome::UnknownUser);
            }
            if live_connection(conn, requester_id, recipient_id)?.is_some() {
                return Ok(RequestOutcome::AlreadyExists);
            }

            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO partner_connections (id, requester_id, recipient_id, status, created_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4)",
                (id.to_string(), requester_id.to_string(), recipient_id.to_string(), now()),
            )?;
            let connection = query_connection(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Connection vanished after insert: {}", id))?;
            Ok(RequestOutcome::Created(connection))
        })
    }

    /// Accept or reject a pending request. Only the recipient may respond.
    pub fn respond_to_request(
        &self,
        recipient_id: Uuid,
        request_id: Uuid,
        accept: bool,
    ) -> Result<RespondOutcome> {
        self.with_conn_mut(|conn| {
            let Some(existing) = query_connection(conn, request_id)? else {
                return Ok(RespondOutcome::NotFound);
            };
            if existing.recipient_id != recipient_id {
                return Ok(RespondOutcome::NotFound);
            }
            if existing.status != ConnectionStatus::Pending {
                return Ok(RespondOutcome::NotPending);
            }

            let status = if accept {
                ConnectionStatus::Accepted
            } else {
                ConnectionStatus::Rejected
            };
            conn.execute(
                "UPDATE partner_connections SET status = ?2, responded_at = ?3 WHERE id = ?1",
                (request_id.to_string(), status.as_str(), now()),
            )?;
            let updated = query_connection(conn, request_id)?
                .ok_or_else(|| anyhow::anyhow!("Connection vanished during update: {}", request_id))?;
            Ok(RespondOutcome::Updated(updated))
        })
    }

    /// Profiles of everyone with an accepted connection to `user_id`.
    pub fn list_partners(&self, user_id: Uuid) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM partner_connections pc
                 JOIN users u ON u.id = CASE WHEN pc.requester_id = ?1
                                             THEN pc.recipient_id ELSE pc.requester_id END
                 WHERE (pc.requester_id = ?1 OR pc.recipient_id = ?1)
                   AND pc.status = 'ACCEPTED'
                 ORDER BY u.username",
                user_columns("u")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], read_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(UserRow::into_profile).collect()
        })
    }

    /// Pending requests addressed to `user_id`.
    pub fn pending_requests(&self, user_id: Uuid) -> Result<Vec<PartnerConnection>> {
        self.with_conn(|conn| query_pending(conn, "recipient_id", user_id))
    }

    /// Pending requests sent by `user_id`.
    pub fn sent_requests(&self, user_id: Uuid) -> Result<Vec<PartnerConnection>> {
        self.with_conn(|conn| query_pending(conn, "requester_id", user_id))
    }

    /// Ends an accepted partnership. Returns false if there was none.
    pub fn remove_partner(&self, user_id: Uuid, partner_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM partner_connections
                 WHERE status = 'ACCEPTED'
                   AND ((requester_id = ?1 AND recipient_id = ?2)
                     OR (requester_id = ?2 AND recipient_id = ?1))",
                (user_id.to_string(), partner_id.to_string()),
            )?;
            Ok(n > 0)
        })
    }

    /// Users with no pending or accepted connection to `user_id`, ranked by
    /// the number of interests they share with them.
    pub fn partner_suggestions(&self, user_id: Uuid, limit: usize) -> Result<Vec<PartnerSuggestion>> {
        let Some(me) = self.get_profile(user_id)? else {
            return Ok(vec![]);
        };

        let candidates = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users u
                 WHERE u.id != ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM partner_connections pc
                       WHERE pc.status IN ('PENDING', 'ACCEPTED')
                         AND ((pc.requester_id = ?1 AND pc.recipient_id = u.id)
                           OR (pc.recipient_id = ?1 AND pc.requester_id = u.id)))",
                user_columns("u")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], read_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(UserRow::into_profile).collect::<Result<Vec<_>>>()
        })?;

        let mut suggestions: Vec<PartnerSuggestion> = candidates
            .into_iter()
            .map(|profile| {
                let shared_interests = profile
                    .interests
                    .iter()
                    .filter(|tag| me.interests.contains(tag))
                    .cloned()
                    .collect();
                PartnerSuggestion {
                    profile,
                    shared_interests,
                }
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.shared_interests
                .len()
                .cmp(&a.shared_interests.len())
                .then_with(|| (b.profile.fitness_level == me.fitness_level)
                    .cmp(&(a.profile.fitness_level == me.fitness_level)))
                .then_with(|| a.profile.username.cmp(&b.profile.username))
        });
        suggestions.truncate(limit);
        Ok(suggestions)
    }
}

fn read_partner_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartnerRow> {
    Ok(PartnerRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        recipient_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        responded_at: row.get(5)?,
    })
}

fn query_connection(conn: &Connection, id: Uuid) -> Result<Option<PartnerConnection>> {
    let sql = format!("SELECT {} FROM partner_connections WHERE id = ?1", PARTNER_COLUMNS);
    conn.query_row(&sql, [id.to_string()], read_partner_row)
        .optional()?
        .map(PartnerRow::into_connection)
        .transpose()
}

/// Pending or accepted connection between two users, in either direction.
fn live_connection(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<PartnerConnection>> {
    let sql = format!(
        "SELECT {} FROM partner_connections
         WHERE status IN ('PENDING', 'ACCEPTED')
           AND ((requester_id = ?1 AND recipient_id = ?2)
             OR (requester_id = ?2 AND recipient_id = ?1))",
        PARTNER_COLUMNS
    );
    conn.query_row(&sql, (a.to_string(), b.to_string()), read_partner_row)
        .optional()?
        .map(PartnerRow::into_connection)
        .transpose()
}

fn query_pending(conn: &Connection, column: &str, user_id: Uuid) -> Result<Vec<PartnerConnection>> {
    let sql = format!(
        "SELECT {} FROM partner_connections
         WHERE {} = ?1 AND status = 'PENDING'
         ORDER BY created_at DESC",
        PARTNER_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id.to_string()], read_partner_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(PartnerRow::into_connection).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::{db, user};
    use stride_types::api::UpdateProfileRequest;

    #[test]
    fn request_accept_flow_links_both_sides() {
        let db = db();
        let a = user(&db, "alex");
        let b = user(&db, "bea");

        let RequestOutcome::Created(request) = db.create_partner_request(a, b).unwrap() else {
            panic!("request not created");
        };
        assert_eq!(request.status, ConnectionStatus::Pending);

        let pending = db.pending_requests(b).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester_id, a);
        assert_eq!(db.sent_requests(a).unwrap().len(), 1);

        let RespondOutcome::Updated(accepted) = db.respond_to_request(b, request.id, true).unwrap() else {
            panic!("request not accepted");
        };
        assert_eq!(accepted.status, ConnectionStatus::Accepted);
        assert!(accepted.responded_at.is_some());

        let a_partners: Vec<Uuid> = db.list_partners(a).unwrap().iter().map(|p| p.id).collect();
        let b_partners: Vec<Uuid> = db.list_partners(b).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(a_partners, vec![b]);
        assert_eq!(b_partners, vec![a]);

        assert!(db.pending_requests(b).unwrap().is_empty());
        assert!(db.sent_requests(a).unwrap().is_empty());
    }

    #[test]
    fn invalid_requests_are_refused() {
        let db = db();
        let a = user(&db, "alex");
        let b = user(&db, "bea");

        assert!(matches!(db.create_partner_request(a, a).unwrap(), RequestOutcome::SelfRequest));
        assert!(matches!(
            db.create_partner_request(a, Uuid::new_v4()).unwrap(),
            RequestOutcome::UnknownUser
        ));
        assert!(matches!(db.create_partner_request(a, b).unwrap(), RequestOutcome::Created(_)));
        assert!(matches!(db.create_partner_request(a, b).unwrap(), RequestOutcome::AlreadyExists));
        assert!(matches!(db.create_partner_request(b, a).unwrap(), RequestOutcome::AlreadyExists));
    }

    #[test]
    fn only_recipient_responds_and_only_once() {
        let db = db();
        let a = user(&db, "alex");
        let b = user(&db, "bea");
        let RequestOutcome::Created(request) = db.create_partner_request(a, b).unwrap() else {
            panic!("request not created");
        };

        assert!(matches!(db.respond_to_request(a, request.id, true).unwrap(), RespondOutcome::NotFound));
        assert!(matches!(db.respond_to_request(b, request.id, false).unwrap(), RespondOutcome::Updated(_)));
        assert!(matches!(db.respond_to_request(b, request.id, true).unwrap(), RespondOutcome::NotPending));
        assert!(db.list_partners(a).unwrap().is_empty());

        // A rejected request does not block a new one
        assert!(matches!(db.create_partner_request(a, b).unwrap(), RequestOutcome::Created(_)));
    }

    #[test]
    fn remove_partner_ends_partnership() {
        let db = db();
        let a = user(&db, "alex");
        let b = user(&db, "bea");
        let RequestOutcome::Created(request) = db.create_partner_request(a, b).unwrap() else {
            panic!("request not created");
        };
        db.respond_to_request(b, request.id, true).unwrap();

        assert!(db.remove_partner(b, a).unwrap());
        assert!(db.list_partners(a).unwrap().is_empty());
        assert!(!db.remove_partner(b, a).unwrap());
    }

    #[test]
    fn suggestions_rank_by_shared_interests_and_skip_connected() {
        let db = db();
        let me = user(&db, "me");
        let runner = user(&db, "runner");
        let lifter = user(&db, "lifter");
        let friend = user(&db, "friend");

        let interests = |tags: &[&str]| UpdateProfileRequest {
            interests: Some(tags.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        };
        db.update_profile(me, &interests(&["running", "cycling"])).unwrap();
        db.update_profile(runner, &interests(&["running", "cycling", "swimming"])).unwrap();
        db.update_profile(lifter, &interests(&["powerlifting"])).unwrap();
        db.update_profile(friend, &interests(&["running"])).unwrap();
        db.create_partner_request(me, friend).unwrap();

        let suggestions = db.partner_suggestions(me, 10).unwrap();
        let ids: Vec<Uuid> = suggestions.iter().map(|s| s.profile.id).collect();
        assert_eq!(ids, vec![runner, lifter]);
        assert_eq!(suggestions[0].shared_interests, vec!["running", "cycling"]);
        assert!(suggestions[1].shared_interests.is_empty());
    }
}
