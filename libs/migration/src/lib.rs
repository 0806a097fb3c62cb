pub use sea_orm_migration::prelude::*;

mod m20250705_000000_create_jobs;
mod m20250705_000001_create_ip_bans;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250705_000000_create_jobs::Migration),
            Box::new(m20250705_000001_create_ip_bans::Migration),
        ]
    }
}
