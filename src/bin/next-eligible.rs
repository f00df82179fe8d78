use std::error::Error;

use dotenv::dotenv;
use log::{debug, info, initialize_logger, o};
use structopt::StructOpt;
use time::Duration;

use intern_tracker::clock::{Clock, SystemClock};
use intern_tracker::config::{get_variable, parse_positive_variable};
use intern_tracker::db::PgDb;
use intern_tracker::gate::{Admission, Gatekeeper};
use intern_tracker::identity::IdentityKey;
use intern_tracker::timestamp;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "next-eligible",
    about = "Print when each of the given interns may next submit an activity form"
)]
struct Opt {
    /// Cool-down window in seconds (defaults to BACKEND_COOL_DOWN_SECONDS, then 12 hours)
    #[structopt(long)]
    cool_down_seconds: Option<i64>,

    /// Display names, as typed into the form
    #[structopt(required = true)]
    names: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let opt = Opt::from_args();

    let logger = initialize_logger();

    let connection_string = get_variable("BACKEND_DB_CONNECTION_STRING");
    let pool = sqlx::Pool::connect(&connection_string)
        .await
        .expect("create database pool from BACKEND_DB_CONNECTION_STRING");
    let db = PgDb::new(pool);

    let cool_down_seconds = match opt.cool_down_seconds {
        Some(seconds) if seconds <= 0 => return Err("--cool-down-seconds must be positive".into()),
        Some(seconds) => seconds,
        None => parse_positive_variable("BACKEND_COOL_DOWN_SECONDS", 12 * 60 * 60),
    };
    let cool_down = Duration::seconds(cool_down_seconds);
    let gatekeeper = Gatekeeper::new(cool_down);
    let now = SystemClock.now();

    info!(logger, "Checking {} names...", opt.names.len(); "now" => timestamp::format(now));

    for name in &opt.names {
        let logger = logger.new(o!("name" => name.clone()));
        let identity = IdentityKey::from_name(name)?;

        debug!(logger, "Looking up latest submission..."; "identity" => identity.to_string());

        match gatekeeper.eligibility(&identity, now, &db).await? {
            Admission::Accepted => println!("{}\tnow", name),
            Admission::Rejected { next_eligible_time } => {
                println!("{}\t{}", name, timestamp::format(next_eligible_time))
            }
        }
    }

    Ok(())
}
