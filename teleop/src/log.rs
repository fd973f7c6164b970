use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Records queued before the sink drops new ones
const CAPACITY: usize = 256;

struct SyncRecord {
    timestamp: Instant,
    level: Level,
    target: String,
    content: String,
}

/// Receiving end of the logger, drained from the main loop.
pub struct LogSink {
    receiver: Receiver<SyncRecord>,
    start: Instant,
}

/// Logger usable from the serial and macro threads without blocking them.
pub struct Logger {
    sender: SyncSender<SyncRecord>,
    level: LevelFilter,
}

impl Logger {
    pub fn init(level: LevelFilter) -> LogSink {
        let (sender, receiver) = sync_channel(CAPACITY);
        let start = Instant::now();
        let logger = Box::new(Self {
            sender,
            level,
        });
        let _ = log::set_logger(Box::leak(logger)).map(|()| log::set_max_level(level));
        LogSink {
            receiver,
            start,
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Full queue: the record is lost rather than stalling the caller
            let _ = self.sender.try_send(SyncRecord {
                timestamp: Instant::now(),
                level: record.level(),
                target: record.target().to_owned(),
                content: std::fmt::format(*record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl LogSink {
    pub fn handle_logs(&mut self) {
        for record in self.receiver.try_iter() {
            println!(
                "[{:<9.5}] {:<5} {}: {}",
                record.timestamp.duration_since(self.start).as_secs_f32(),
                record.level,
                record.target,
                record.content
            );
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.handle_logs();
    }
}
