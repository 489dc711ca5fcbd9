/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, Write};

use anyhow::anyhow;
use chrono::Local;
use flume::{Receiver, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};

const CHANNEL_CAPACITY: usize = 4096;

struct LogValue {
    level: Level,
    target: String,
    message: String,
}

/// Process logger. Formatting and io happen on a dedicated thread fed by a
/// bounded channel, records are dropped instead of blocking the runtime
/// when the channel is full.
struct StdLogger {
    sender: Sender<LogValue>,
}

impl Log for StdLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = self.sender.try_send(LogValue {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}

pub fn setup(verbose_level: u8) -> anyhow::Result<()> {
    let level = match verbose_level {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let (sender, receiver) = flume::bounded(CHANNEL_CAPACITY);
    std::thread::Builder::new()
        .name("log-io".to_string())
        .spawn(move || run_io_thread(receiver))
        .map_err(|e| anyhow!("failed to spawn log io thread: {e}"))?;

    log::set_boxed_logger(Box::new(StdLogger { sender }))
        .map_err(|e| anyhow!("failed to set logger: {e}"))?;
    log::set_max_level(level);
    Ok(())
}

fn run_io_thread(receiver: Receiver<LogValue>) {
    let stderr = io::stderr();
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    while let Ok(v) = receiver.recv() {
        buf.clear();
        let _ = write_record(&mut buf, &v);

        while let Ok(v) = receiver.try_recv() {
            let _ = write_record(&mut buf, &v);
        }

        let mut io = stderr.lock();
        let _ = io.write_all(&buf);
        let _ = io.flush();
    }
}

fn write_record<IO: Write>(io: &mut IO, v: &LogValue) -> io::Result<()> {
    let datetime = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
    writeln!(io, "{datetime} {} {}: {}", v.level, v.target, v.message)
}
