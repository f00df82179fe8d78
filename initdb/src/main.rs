//! Applies the bundled migrations (submissions, projects, groups and
//! ratings) to the database named by `BACKEND_DB_CONNECTION_STRING`.

use std::env;

use movine::Movine;
use postgres::{Client, NoTls};

use log::{debug, info, initialize_logger, o};

const MIGRATION_DIR: &str = "./migrations";

fn main() {
    dotenv::dotenv().ok();

    let logger = initialize_logger().new(o!("tool" => "initdb", "service" => info::NAME));
    let connection_string = env::var("BACKEND_DB_CONNECTION_STRING")
        .expect("could not read BACKEND_DB_CONNECTION_STRING");
    let migration_dir = env::var("BACKEND_MIGRATION_DIR").unwrap_or_else(|_| MIGRATION_DIR.to_owned());

    debug!(logger, "Connecting to database...");

    let client = Client::connect(&connection_string, NoTls).expect("could not connect to database");

    let mut movine = Movine::new(client);
    movine.set_migration_dir(&migration_dir);

    if movine.status().is_err() {
        debug!(logger, "Initializing movine...");
        movine.initialize().expect("failed to initialize movine")
    }

    info!(logger, "Running migrations..."; "migration_dir" => &migration_dir);
    movine.up().expect("failed to run migrations");

    info!(logger, "Completed initialization.");
}
