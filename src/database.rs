use std::fmt::Display;

use serde::Deserialize;
use snafu::{Location, ResultExt, Snafu};
use surrealdb::engine::any::Any;
use surrealdb::opt::{auth, QueryResult};
use surrealdb::Surreal;
use url::Url;

pub use surrealdb::sql::Thing;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

const SCHEMA: &str = include_str!("../schema.surrealql");

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatabaseError {
    #[snafu(display("cannot connect to the database `{url}` at {location}: {source}"))]
    DatabaseConnection {
        url: Url,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not apply the database schema at {location}: {source}"))]
    Schema {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to query the database at {location}: {source}"))]
    DatabaseQuery {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to deserialize the database response at {location}: {source}"))]
    DatabaseDeserialize {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to parse the database response at {location}: response is empty"))]
    EmptyQuery {
        #[snafu(implicit)]
        location: Location,
    },
}

pub async fn connect(config: &DatabaseConfig) -> Result<Database> {
    let database = surrealdb::engine::any::connect(config.url.as_str())
        .await
        .context(DatabaseConnectionSnafu {
            url: config.url.clone(),
        })?;

    if let Some(credentials) = &config.credentials {
        database
            .signin(credentials.auth(config))
            .await
            .context(DatabaseConnectionSnafu {
                url: config.url.clone(),
            })?;
    }

    database
        .use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .context(DatabaseConnectionSnafu {
            url: config.url.clone(),
        })?;

    database
        .query(SCHEMA)
        .await
        .context(SchemaSnafu)?
        .check()
        .context(SchemaSnafu)?;

    Ok(Database { database })
}

/// A handle to the view store. Cheap to clone, shared across request handlers.
#[derive(Debug, Clone)]
pub struct Database {
    database: Surreal<Any>,
}

impl Database {
    /// Connects to a fresh in-memory store, mainly for development and tests.
    pub async fn memory() -> Result<Database> {
        let config = DatabaseConfig {
            url: default_endpoint(),
            namespace: "test".to_string(),
            database: "test".to_string(),
            credentials: None,
        };

        connect(&config).await
    }

    /// Create a builder to execute arbitrary SurrealQL on the database.
    ///
    /// # Example
    /// ```ignore
    /// let post: Option<Post> = database
    ///     .sql("SELECT * FROM posts WHERE slug = $slug LIMIT 1")
    ///     .bind(("slug", "post-a"))
    ///     .fetch()
    ///     .await?;
    /// ```
    ///
    /// The `fetch` method can deserialize the result into either a single value
    /// (`Option<T>`) or a collection of values (`Vec<T>`).
    pub fn sql(&self, query: &str) -> Query<'_> {
        let query = self.database.query(query);
        Query { query }
    }
}

impl std::ops::Deref for Database {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.database
    }
}

#[derive(Debug)]
pub struct Query<'a> {
    query: surrealdb::method::Query<'a, Any>,
}

impl Query<'_> {
    pub fn bind(mut self, params: impl serde::Serialize) -> Self {
        let query = self.query;
        self.query = query.bind(params);
        self
    }

    pub async fn fetch<T: serde::de::DeserializeOwned>(self) -> Result<T>
    where
        usize: QueryResult<T>,
    {
        let mut statements = self.query.await.context(DatabaseQuerySnafu)?;
        let result = statements.take::<T>(0).context(DatabaseDeserializeSnafu)?;
        Ok(result)
    }
}

/// Helper function for throwing a database error
pub fn throw(msg: impl Display) -> surrealdb::Error {
    surrealdb::error::Db::Thrown(msg.to_string()).into()
}

/// Whether the error is a violation of a `UNIQUE` index, i.e. another writer
/// committed the same record first. The local engines report this as
/// [surrealdb::error::Db::IndexExists]; remote engines flatten it into a query
/// error message.
pub fn is_unique_conflict(error: &surrealdb::Error) -> bool {
    match error {
        surrealdb::Error::Db(surrealdb::error::Db::IndexExists { .. }) => true,
        surrealdb::Error::Api(surrealdb::error::Api::Query(message)) => {
            message.contains("already contains")
        }
        _ => false,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "surreal_url", default = "default_endpoint")]
    url: Url,
    #[serde(rename = "surreal_ns", default = "default_namespace")]
    namespace: String,
    #[serde(rename = "surreal_db", default = "default_database")]
    database: String,
    #[serde(flatten)]
    credentials: Option<DatabaseCredentials>,
}

#[derive(Debug, Deserialize, Clone)]
struct DatabaseCredentials {
    #[serde(rename = "surreal_user")]
    username: String,
    #[serde(rename = "surreal_pass")]
    password: String,
}

impl DatabaseCredentials {
    fn auth<'a>(
        &'a self,
        config: &'a DatabaseConfig,
    ) -> impl auth::Credentials<auth::Signin, auth::Jwt> + 'a {
        auth::Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &self.username,
            password: &self.password,
        }
    }
}

fn default_endpoint() -> Url {
    Url::parse("mem://").expect("mem:// is a valid url")
}

fn default_namespace() -> String {
    "miru".to_string()
}

fn default_database() -> String {
    "blog".to_string()
}
