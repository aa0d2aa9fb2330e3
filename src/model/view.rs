use serde::{Deserialize, Serialize};

use crate::database::{Database, Result, Thing};

use super::{PostId, Timestamp};

pub type ViewId = Thing;

/// Ledger entry marking that a fingerprint has been credited for a post.
/// Created exactly once, never updated; the (`post`, `fingerprint`) pair is
/// unique at the storage layer (see `schema.surrealql`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PostView {
    pub id: ViewId,
    pub post: PostId,
    /// sha-256 over the client identity; opaque, not reversible to the raw ip.
    pub fingerprint: String,
    // raw identity, kept for debugging and audit only
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: Timestamp,
}

impl PostView {
    /// Whether this fingerprint has already been credited for the post. Under
    /// concurrency this is only a hint; the unique index is the authority.
    pub async fn exists(post: &PostId, fingerprint: &str, db: &Database) -> Result<bool> {
        let found: Option<PostView> = db
            .sql("SELECT * FROM views WHERE post = $post AND fingerprint = $fingerprint LIMIT 1")
            .bind(("post", post.clone()))
            .bind(("fingerprint", fingerprint.to_string()))
            .fetch()
            .await?;

        Ok(found.is_some())
    }

    /// Number of distinct viewers recorded for the post.
    pub async fn count_for(post: &PostId, db: &Database) -> Result<i64> {
        #[derive(Deserialize)]
        struct Count {
            count: i64,
        }

        let count: Option<Count> = db
            .sql("SELECT count() FROM views WHERE post = $post GROUP ALL")
            .bind(("post", post.clone()))
            .fetch()
            .await?;

        Ok(count.map_or(0, |count| count.count))
    }
}
