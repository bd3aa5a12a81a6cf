use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use super::Session;
use crate::Context;
use crate::cli::{StatusArgs, StatusFormat};
use crate::format;

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let application = session.application(&args.app)?;

    if !args.watch {
        let status = session.orchestrator.status(&application, args.activities)?;
        print!("{}", format::render(&status, args.format)?);
        return Ok(());
    }

    // JSON output stays machine-readable: no screen clearing between frames
    let clear = args.format != StatusFormat::Json;
    let interval = Duration::from_secs(args.interval.max(1));
    while !session.cancel.is_cancelled() {
        let status = session.orchestrator.status(&application, args.activities)?;
        let frame = format::render(&status, args.format)?;

        let mut out = io::stdout().lock();
        if clear {
            write!(out, "\x1b[2J\x1b[H")?;
        }
        write!(out, "{frame}")?;
        if clear {
            writeln!(
                out,
                "{}",
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string().bright_white()
            )?;
        }
        out.flush()?;
        drop(out);

        sleep_unless_cancelled(&session, interval);
    }
    Ok(())
}

fn sleep_unless_cancelled(session: &Session, total: Duration) {
    let step = Duration::from_millis(200);
    let mut slept = Duration::ZERO;
    while slept < total && !session.cancel.is_cancelled() {
        thread::sleep(step);
        slept += step;
    }
}
