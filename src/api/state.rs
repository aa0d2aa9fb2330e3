use derive_new::new;

use crate::database::Database;

#[derive(Debug, Clone, new)]
pub struct App {
    pub database: Database,
}
