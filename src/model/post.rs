use derive_new::new;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use crate::database::{Database, EmptyQuerySnafu, Result, Thing};

use super::{now, Timestamp};

pub type PostId = Thing;

pub fn new_post_id() -> PostId {
    ("posts".to_string(), surrealdb::sql::Id::rand().to_string()).into()
}

/// The content item a view is credited to. Content itself is owned by the blog;
/// this service only reads the slug and mutates `view_count`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, new)]
pub struct Post {
    #[new(value = "new_post_id()")]
    pub id: PostId,
    #[new(value = "now()")]
    pub created_at: Timestamp,

    pub slug: String,
    pub title: String,
    #[new(value = "true")]
    pub published: bool,
    #[new(default)]
    pub view_count: i64,
}

impl Post {
    pub async fn create(&self, db: &Database) -> Result<Post> {
        db.create(("posts", self.id.id.clone()))
            .content(self)
            .await
            .context(crate::database::DatabaseQuerySnafu)?
            .context(EmptyQuerySnafu)
    }

    /// Looks up a publicly visible post. Unpublished posts are invisible to the
    /// view tracker, the same as a missing one.
    pub async fn find_by_slug(slug: &str, db: &Database) -> Result<Option<Post>> {
        db.sql("SELECT * FROM posts WHERE slug = $slug AND published = true LIMIT 1")
            .bind(("slug", slug.to_string()))
            .fetch()
            .await
    }

    /// Re-reads this post's persisted state, mainly to observe a counter that
    /// another writer moved.
    pub async fn reload(&self, db: &Database) -> Result<Post> {
        db.select(("posts", self.id.id.clone()))
            .await
            .context(crate::database::DatabaseQuerySnafu)?
            .context(EmptyQuerySnafu)
    }
}
