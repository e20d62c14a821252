// Everything the event bus has to say: masks, failures, and misses.

use jiff::{SignedDuration, ToSpan as _, Zoned};
use metronome::{
    mask, Closure, DateTrigger, Event, IntervalTrigger, JobBuilder, Scheduler, UnitToUnit,
};
use std::time::Duration;

fn steady() -> metronome::JobOutcome {
    Ok(Some(serde_json::json!({"rows": 42})))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let scheduler = Scheduler::new();

    // One listener for the happy path, one for everything that goes wrong.
    scheduler.add_listener(mask::JOB_EXECUTED, |event| {
        if let Event::JobExecuted {
            job_id,
            duration,
            output,
            ..
        } = event
        {
            println!("{job_id} finished in {duration:?} with output {output:?}");
        }
    });
    scheduler.add_listener(mask::JOB_ERROR | mask::JOB_MISSED, |event| {
        println!("trouble: {event:?}");
    });

    let every_second = IntervalTrigger::builder().seconds(1).build()?;
    scheduler
        .add_job(
            JobBuilder::new(every_second, UnitToUnit::new("steady", steady))
                .id("steady")
                .misfire_grace(Some(SignedDuration::from_secs(30))),
        )
        .await?;

    // This one fails every time; watch for the JobError events.
    let soon = Zoned::now().checked_add(1500.milliseconds())?;
    scheduler
        .add_job(JobBuilder::new(
            DateTrigger::at(soon),
            Closure::new("flaky", |_: &[Zoned]| Err("out of disk".into())),
        ))
        .await?;

    scheduler.start(false).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    scheduler.shutdown(true).await?;
    Ok(())
}
