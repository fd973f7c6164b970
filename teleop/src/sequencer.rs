//! Macro programs: ordered delay and motion steps replayed on a background thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::serial::FrameSink;
use crate::store::Store;
use crate::types::{CommandFrame, Event};

const NAMESPACE: &str = "macro";
/// Granularity at which a running delay checks for cancellation
pub const DELAY_TICK: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepAction {
    /// Pause for this many seconds
    Delay(u64),
    Motion(CommandFrame),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum StepCommand {
    Delay,
    Motion,
}

/// On disk shape of a step
#[derive(Serialize, Deserialize, Clone, Debug)]
struct StepRecord {
    checked: bool,
    command: StepCommand,
    name: String,
    data: Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "StepRecord", into = "StepRecord")]
pub struct MacroStep {
    pub enabled: bool,
    pub label: String,
    pub action: StepAction,
}

impl MacroStep {
    pub fn delay(seconds: u64) -> Self {
        Self {
            enabled: true,
            label: "delay".into(),
            action: StepAction::Delay(seconds),
        }
    }

    pub fn motion<S: Into<String>>(label: S, frame: CommandFrame) -> Self {
        Self {
            enabled: true,
            label: label.into(),
            action: StepAction::Motion(frame),
        }
    }
}

impl fmt::Display for MacroStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            StepAction::Delay(seconds) => write!(f, "{}: delay {}s", self.label, seconds),
            StepAction::Motion(frame) => write!(f, "{}: motion {}", self.label, frame),
        }
    }
}

impl TryFrom<StepRecord> for MacroStep {
    type Error = Error;

    fn try_from(record: StepRecord) -> Result<Self> {
        let action = match record.command {
            StepCommand::Delay => match &record.data {
                Value::String(text) => parse_delay(text)?,
                data => serde_json::from_value(data.clone()).map(StepAction::Delay).map_err(|e| {
                    Error::MalformedPayload {
                        text: data.to_string(),
                        reason: e.to_string(),
                    }
                })?,
            },
            StepCommand::Motion => {
                let bytes: Vec<u8> =
                    serde_json::from_value(record.data.clone()).map_err(|e| Error::MalformedPayload {
                        text: record.data.to_string(),
                        reason: e.to_string(),
                    })?;
                StepAction::Motion(CommandFrame::try_from(bytes)?)
            },
        };
        Ok(MacroStep {
            enabled: record.checked,
            label: record.name,
            action,
        })
    }
}

impl From<MacroStep> for StepRecord {
    fn from(step: MacroStep) -> Self {
        let (command, data) = match step.action {
            StepAction::Delay(seconds) => (StepCommand::Delay, Value::from(seconds)),
            StepAction::Motion(frame) => (StepCommand::Motion, Value::from(Vec::from(frame))),
        };
        StepRecord {
            checked: step.enabled,
            command,
            name: step.label,
            data,
        }
    }
}

pub type MacroProgram = Vec<MacroStep>;

/// Field of an existing step to overwrite
#[derive(Clone, Debug)]
pub enum StepField {
    Enabled(bool),
    Label(String),
    /// Text form of the payload: seconds for a delay, 17 byte values for a motion
    Payload(String),
}

fn malformed(text: &str, reason: &str) -> Error {
    Error::MalformedPayload {
        text: text.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse_delay(text: &str) -> Result<StepAction> {
    text.trim().parse().map(StepAction::Delay).map_err(|e| malformed(text, &e.to_string()))
}

/// Accepts `[255, 0, ..., 254, 254]` as well as bare comma or space separated values.
fn parse_motion(text: &str) -> Result<StepAction> {
    let inner = text.trim();
    let inner = inner.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(inner);
    let bytes = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>().map_err(|e| malformed(text, &format!("{:?}: {}", s, e))))
        .collect::<Result<Vec<u8>>>()?;
    CommandFrame::try_from(bytes).map(StepAction::Motion).map_err(|e| malformed(text, &e.to_string()))
}

/// Cooperative stop flag shared with the playback thread
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Playback {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

pub struct MacroSequencer {
    program: MacroProgram,
    playback: Option<Playback>,
    events: Sender<Event>,
    tick: Duration,
}

impl MacroSequencer {
    pub fn new(events: Sender<Event>) -> Self {
        Self {
            program: MacroProgram::new(),
            playback: None,
            events,
            tick: DELAY_TICK,
        }
    }

    pub fn program(&self) -> &[MacroStep] {
        &self.program
    }

    pub fn append(&mut self, step: MacroStep) {
        self.program.push(step);
    }

    pub fn remove(&mut self, index: usize) -> Result<MacroStep> {
        if index < self.program.len() {
            Ok(self.program.remove(index))
        } else {
            Err(Error::InvalidStep(index))
        }
    }

    pub fn clear(&mut self) {
        self.program.clear();
    }

    /// Edits one step in place. A payload that does not parse leaves the step unchanged.
    pub fn set_field(&mut self, index: usize, field: StepField) -> Result<()> {
        let step = self.program.get_mut(index).ok_or(Error::InvalidStep(index))?;
        match field {
            StepField::Enabled(enabled) => step.enabled = enabled,
            StepField::Label(label) => step.label = label,
            StepField::Payload(text) => {
                let parsed = match step.action {
                    StepAction::Delay(_) => parse_delay(&text),
                    StepAction::Motion(_) => parse_motion(&text),
                };
                step.action = parsed.inspect_err(|e| error!("{}", e))?;
            },
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|playback| !playback.handle.is_finished())
    }

    /// Replays a snapshot of the program on a background thread.
    ///
    /// Completion, natural or cancelled, is reported with [`Event::MacroFinished`].
    pub fn play<S>(&mut self, sink: S) -> Result<()>
    where
        S: FrameSink + 'static,
    {
        if self.is_playing() {
            warn!("Macro already playing");
            return Err(Error::AlreadyPlaying);
        }
        if let Some(previous) = self.playback.take() {
            let _ = previous.handle.join();
        }

        info!("Macro Start");
        let cancel = CancelToken::default();
        let program = self.program.clone();
        let events = self.events.clone();
        let token = cancel.clone();
        let tick = self.tick;
        let handle = thread::Builder::new()
            .name("macro".into())
            .spawn(move || run(&program, &sink, &token, tick, &events))?;
        self.playback = Some(Playback {
            cancel,
            handle,
        });
        Ok(())
    }

    /// Asks the running playback to stop at its next check point.
    pub fn stop(&self) {
        if let Some(playback) = &self.playback {
            info!("Macro Stop");
            playback.cancel.cancel();
        }
    }

    /// Blocks until the current playback, if any, has ended.
    pub fn wait(&mut self) {
        if let Some(playback) = self.playback.take() {
            if playback.handle.join().is_err() {
                error!("Macro thread panicked");
            }
        }
    }

    pub fn save(&self, store: &Store, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        info!("Save macro {}", name);
        store.save_value(NAMESPACE, name, &self.program)
    }

    /// Replaces the program with the one stored under `name`.
    pub fn load(&mut self, store: &Store, name: &str) -> Result<()> {
        let program: MacroProgram = store
            .get(NAMESPACE, name)
            .inspect_err(|e| error!("{}", e))?
            .ok_or_else(|| Error::UnknownMacro(name.to_owned()))?;
        info!("Load macro {} ({} steps)", name, program.len());
        self.program = program;
        Ok(())
    }

    pub fn saved_names(store: &Store) -> Result<Vec<String>> {
        store.names(NAMESPACE)
    }
}

impl Drop for MacroSequencer {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

fn run<S: FrameSink>(
    program: &[MacroStep],
    sink: &S,
    cancel: &CancelToken,
    tick: Duration,
    events: &Sender<Event>,
) {
    for step in program {
        if cancel.is_cancelled() {
            break;
        }
        if !step.enabled {
            continue;
        }
        info!("{}", step);
        match step.action {
            StepAction::Delay(seconds) => {
                for _ in 0..seconds {
                    if cancel.is_cancelled() {
                        break;
                    }
                    thread::sleep(tick);
                }
            },
            StepAction::Motion(frame) => {
                if let Err(e) = sink.send(&frame) {
                    error!("Macro step {} not sent: {}", step.label, e);
                }
            },
        }
    }
    let cancelled = cancel.is_cancelled();
    info!("Macro finished");
    let _ = events.send(Event::MacroFinished {
        cancelled,
    });
}
