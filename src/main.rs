use dotenvy::dotenv;

use miru::error::ApplicationError;
use miru::{api, config, database, logger};

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = config::load()?;

    let _guard = logger::init(&config)?;

    let database = database::connect(&config.database).await?;

    api::serve(&config, database).await
}
