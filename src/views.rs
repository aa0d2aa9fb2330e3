use snafu::ResultExt;
use tracing::instrument;

use crate::database::{
    is_unique_conflict, throw, Database, DatabaseError, DatabaseQuerySnafu, Result,
};
use crate::fingerprint::ClientIdentity;
use crate::model::{now, Post, PostView};

/// What a single record-view call observed: whether this visitor was credited
/// for the first time, and the authoritative counter after the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOutcome {
    pub is_new_view: bool,
    pub view_count: i64,
}

/// The ledger insert and the counter increment commit together or not at all,
/// and the unique (post, fingerprint) index decides the race between
/// concurrent writers.
const RECORD_VIEW: &str = "
BEGIN TRANSACTION;
CREATE views CONTENT {
    post: $post,
    fingerprint: $fingerprint,
    ip_address: $ip,
    user_agent: $user_agent,
    created_at: $created_at
};
UPDATE $post SET view_count += 1;
COMMIT TRANSACTION;
";

/// Credits a view to `post` if this visitor has not been counted yet.
///
/// The common case (repeat visitor) is answered by a cheap existence check; a
/// new visitor pays for the transactional insert-and-increment. The existence
/// check is purely an optimization: two requests can both pass it, and then
/// the unique index lets exactly one transaction commit. The loser's conflict
/// is expected concurrent behavior, so it is swallowed and reported as a
/// repeat view with the current count.
#[instrument(skip(db, post, identity), fields(post = %post.id))]
pub async fn record_view(
    db: &Database,
    post: &Post,
    identity: &ClientIdentity,
) -> Result<ViewOutcome> {
    let fingerprint = identity.fingerprint();

    if PostView::exists(&post.id, &fingerprint, db).await? {
        return Ok(ViewOutcome {
            is_new_view: false,
            view_count: post.view_count,
        });
    }

    match insert_and_increment(db, post, &fingerprint, identity).await {
        Ok(updated) => Ok(ViewOutcome {
            is_new_view: true,
            view_count: updated.view_count,
        }),

        Err(error) if is_unique_conflict(&error) => {
            tracing::debug!(post = %post.id, "lost the insert race, view already recorded");

            let current = post.reload(db).await?;
            Ok(ViewOutcome {
                is_new_view: false,
                view_count: current.view_count,
            })
        }

        Err(source) => Err(source).context(DatabaseQuerySnafu),
    }
}

async fn insert_and_increment(
    db: &Database,
    post: &Post,
    fingerprint: &str,
    identity: &ClientIdentity,
) -> std::result::Result<Post, surrealdb::Error> {
    let mut response = db
        .query(RECORD_VIEW)
        .bind(("post", post.id.clone()))
        .bind(("fingerprint", fingerprint.to_string()))
        .bind(("ip", identity.ip.clone()))
        .bind(("user_agent", identity.user_agent.clone()))
        .bind(("created_at", now()))
        .await?
        .check()?;

    let updated: Option<Post> = response.take(1)?;
    updated.ok_or_else(|| throw("view recorded but the post vanished mid-transaction"))
}

/// Repair operation: resets the denormalized counter to the ledger count.
/// The counter's invariant is "equal to the number of view records for the
/// post"; this restores it if drift is ever suspected.
#[instrument(skip(db, post), fields(post = %post.id))]
pub async fn rebuild_view_count(db: &Database, post: &Post) -> Result<i64, DatabaseError> {
    let updated: Option<Post> = db
        .sql(
            "UPDATE $post \
             SET view_count = array::len((SELECT id FROM views WHERE post = $post)) \
             RETURN AFTER",
        )
        .bind(("post", post.id.clone()))
        .fetch()
        .await?;

    updated
        .map(|post| post.view_count)
        .ok_or_else(|| crate::database::EmptyQuerySnafu.build())
}
