// Schedule a few jobs and watch them fire for a handful of seconds.

use jiff::Zoned;
use metronome::{mask, CronTrigger, IntervalTrigger, JobBuilder, Scheduler, UnitToUnit};
use std::time::Duration;

fn tick() -> metronome::JobOutcome {
    let now = Zoned::now();
    println!("tick! it's {now}");
    Ok(None)
}

fn nightly_backup() -> metronome::JobOutcome {
    println!("running the nightly backup");
    Ok(None)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let scheduler = Scheduler::new();

    let every_two_seconds = IntervalTrigger::builder().seconds(2).build()?;
    scheduler
        .add_job(JobBuilder::new(
            every_two_seconds,
            UnitToUnit::new("tick", tick),
        ))
        .await?;

    let weeknights = CronTrigger::builder()
        .day_of_week("mon-fri")
        .hour("3")
        .minute("30")
        .build()?;
    scheduler
        .add_job(
            JobBuilder::new(weeknights, UnitToUnit::new("backup", nightly_backup)).id("backup"),
        )
        .await?;

    scheduler.add_listener(mask::JOB_EXECUTED | mask::JOB_ERROR, |event| {
        println!("observed: {event:?}");
    });

    let now = Zoned::now();
    println!("starting at {now}");
    scheduler.start(false).await?;
    tokio::time::sleep(Duration::from_secs(7)).await;
    scheduler.shutdown(true).await?;
    Ok(())
}
