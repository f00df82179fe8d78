use std::error::Error;
use std::sync::Arc;

use futures::future::FutureExt;
use log::{info, initialize_logger, o};
use time::Duration;
use tokio::sync::mpsc;
use warp::Filter;

use intern_tracker::clock::SystemClock;
use intern_tracker::config::{get_variable, parse_positive_variable};
use intern_tracker::db::PgDb;
use intern_tracker::environment::{Config, Environment};
use intern_tracker::routes;
use intern_tracker::urls::Urls;

const DEFAULT_COOL_DOWN_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_RECENT_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    let logger = initialize_logger();

    let main_port: u16 = get_variable("BACKEND_PORT")
        .parse()
        .expect("parse BACKEND_PORT as u16");
    let admin_port: u16 = get_variable("BACKEND_ADMIN_PORT")
        .parse()
        .expect("parse BACKEND_ADMIN_PORT as u16");

    info!(logger, "Starting..."; "main_port" => main_port, "admin_port" => admin_port);

    let cool_down = Duration::seconds(parse_positive_variable(
        "BACKEND_COOL_DOWN_SECONDS",
        DEFAULT_COOL_DOWN_SECONDS,
    ));
    let recent_window = Duration::hours(parse_positive_variable(
        "BACKEND_RECENT_HOURS",
        DEFAULT_RECENT_HOURS,
    ));
    let config = Config::new(cool_down, recent_window, get_variable("BACKEND_ADMIN_TOKEN"));

    let logger = Arc::new(logger.new(o!("cool_down_seconds" => cool_down.whole_seconds())));

    info!(logger, "Creating database pool...");
    let connection_string = get_variable("BACKEND_DB_CONNECTION_STRING");
    let pool = sqlx::Pool::connect(&connection_string)
        .await
        .expect("create database pool from BACKEND_DB_CONNECTION_STRING");
    let db = Arc::new(PgDb::new(pool));

    let urls = Arc::new(Urls::new(
        get_variable("BACKEND_BASE_URL"),
        get_variable("BACKEND_API_PATH"),
    ));

    let environment = Environment::new(logger.clone(), db, urls, Arc::new(SystemClock), config);

    let (termination_sender, mut termination_receiver) = mpsc::channel::<()>(1);

    let terminate = Arc::new(move || {
        let termination_sender = termination_sender.clone();

        async move {
            // a full channel means termination is already under way
            let _ = termination_sender.try_send(());
        }
        .boxed()
    });

    let should_terminate = async move {
        termination_receiver.recv().await;
    }
    .shared();

    let ctrlc = {
        let should_terminate = should_terminate.clone();
        let terminate = terminate.clone();

        let signal = tokio::signal::ctrl_c();

        async move {
            tokio::select! {
                _ = should_terminate => {},
                _ = signal => {
                    terminate().await;
                }
            }
        }
    };

    let main_server = {
        let should_terminate = should_terminate.clone();

        let routes = routes::make_api(environment.clone());

        let (_, main_server) =
            warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], main_port), async {
                should_terminate.await;
            });

        main_server
    };

    let admin_server = {
        let should_terminate = should_terminate.clone();
        let terminate = terminate.clone();

        let routes = routes::admin::make_healthz_route(environment.clone()).or(
            routes::admin::make_termination_route(environment.clone(), terminate),
        );

        let (_, admin_server) =
            warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], admin_port), async {
                should_terminate.await;
            });

        admin_server
    };

    tokio::join!(ctrlc, main_server, admin_server);

    info!(logger, "Exiting gracefully...");

    Ok(())
}
