use std::sync::mpsc::Sender;

use log::{error, info};

use crate::config::TeleopParameters;
use crate::error::{Error, Result};
use crate::presets::{ClickOutcome, PresetStore, SlotKey};
use crate::sequencer::{MacroSequencer, MacroStep};
use crate::serial::SerialLink;
use crate::store::Store;
use crate::types::{CommandFrame, Event, LinkState, MotionField, Rpy};

/// State behind the operator's control panel.
///
/// The front end forwards user actions here and reacts to the [`Event`]s sent on the channel
/// given at construction.
pub struct ControlPanel {
    params: TeleopParameters,
    store: Store,
    presets: PresetStore,
    sequencer: MacroSequencer,
    link: Option<SerialLink>,
    editor: CommandFrame,
    events: Sender<Event>,
}

impl ControlPanel {
    pub fn new(params: TeleopParameters, events: Sender<Event>) -> Self {
        let store = Store::new(params.data_dir.clone());
        let presets = PresetStore::open(store.clone());
        let sequencer = MacroSequencer::new(events.clone());
        Self {
            params,
            store,
            presets,
            sequencer,
            link: None,
            editor: CommandFrame::default(),
            events,
        }
    }

    pub fn params(&self) -> &TeleopParameters {
        &self.params
    }

    pub fn set_port(&mut self, port: &str) {
        self.params.serial.port = port.to_owned();
    }

    /// Starts a fresh connection with the configured serial settings.
    pub fn connect(&mut self) -> Result<()> {
        if self.link.as_ref().is_some_and(|link| link.state() != LinkState::Failed) {
            return Err(Error::AlreadyConnected);
        }
        self.disconnect();
        let mut link = SerialLink::new(self.events.clone());
        link.connect(&self.params.serial)?;
        self.link = Some(link);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.disconnect();
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link.as_ref().map_or(LinkState::Disconnected, SerialLink::state)
    }

    pub fn rpy(&self) -> Rpy {
        self.link.as_ref().map(SerialLink::rpy).unwrap_or_default()
    }

    pub fn send(&self, frame: &CommandFrame) -> Result<()> {
        match &self.link {
            Some(link) => link.send(frame),
            None => {
                error!("Serial is not connected");
                Err(Error::NotConnected)
            },
        }
    }

    pub fn editor(&self) -> &CommandFrame {
        &self.editor
    }

    pub fn set_editor(&mut self, frame: CommandFrame) {
        self.editor = frame;
    }

    pub fn set_editor_field(&mut self, field: MotionField, value: u8) {
        self.editor.set(field, value);
    }

    pub fn clear_editor(&mut self) {
        self.editor = CommandFrame::default();
    }

    pub fn send_editor(&self) -> Result<()> {
        self.send(&self.editor)
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn presets_mut(&mut self) -> &mut PresetStore {
        &mut self.presets
    }

    /// Clicks a preset slot and applies the outcome to the editor and the link.
    pub fn click_preset(&mut self, key: SlotKey) -> Result<ClickOutcome> {
        let outcome = self.presets.click(key, &self.editor)?;
        match outcome {
            ClickOutcome::Load(frame) => self.editor = frame,
            ClickOutcome::Send(frame) => self.send(&frame)?,
            ClickOutcome::LoadAndSend(frame) => {
                self.editor = frame;
                self.send(&frame)?;
            },
            ClickOutcome::Saved(_) | ClickOutcome::Deleted(_) | ClickOutcome::Ignored => (),
        }
        Ok(outcome)
    }

    pub fn sequencer(&self) -> &MacroSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut MacroSequencer {
        &mut self.sequencer
    }

    /// Appends the preset named `name` as a motion step.
    pub fn insert_motion(&mut self, name: &str) -> Result<()> {
        let frame = self
            .presets
            .find(name)
            .and_then(|preset| preset.frame)
            .ok_or_else(|| Error::UnknownMotion(name.to_owned()))?;
        self.sequencer.append(MacroStep::motion(name, frame));
        Ok(())
    }

    pub fn insert_delay(&mut self, seconds: u64) {
        self.sequencer.append(MacroStep::delay(seconds));
    }

    pub fn start_macro(&mut self) -> Result<()> {
        let sender = self.link.as_ref().ok_or(Error::NotConnected)?.sender();
        self.sequencer.play(sender)
    }

    pub fn stop_macro(&self) {
        self.sequencer.stop();
    }

    pub fn save_macro(&self, name: &str) -> Result<()> {
        self.sequencer.save(&self.store, name)
    }

    pub fn load_macro(&mut self, name: &str) -> Result<()> {
        self.sequencer.load(&self.store, name)
    }

    pub fn macro_names(&self) -> Result<Vec<String>> {
        MacroSequencer::saved_names(&self.store)
    }
}

impl Drop for ControlPanel {
    fn drop(&mut self) {
        self.sequencer.stop();
        self.sequencer.wait();
        if self.link.is_some() {
            info!("Closing serial link");
        }
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialSettings;
    use crate::presets::ClickAction;
    use std::sync::mpsc::{channel, Receiver};
    use std::time::Duration;

    fn panel(dir: &tempfile::TempDir) -> (ControlPanel, Receiver<Event>) {
        let params = TeleopParameters {
            serial: SerialSettings {
                port: "Test".into(),
                timeout_ms: 50,
                poll_delay_ms: 10,
                ..Default::default()
            },
            data_dir: dir.path().to_owned(),
            ..Default::default()
        };
        let (tx, rx) = channel();
        (ControlPanel::new(params, tx), rx)
    }

    fn next(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_send_requires_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (panel, _rx) = panel(&dir);
        assert!(matches!(panel.send_editor(), Err(Error::NotConnected)));
        assert_eq!(panel.rpy(), Rpy::default());
        assert_eq!(panel.link_state(), LinkState::Disconnected);
    }

    #[test]
    fn test_connect_send_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (mut panel, rx) = panel(&dir);
        panel.connect().unwrap();
        assert_eq!(next(&rx), Event::SerialConnected);
        assert!(matches!(panel.connect(), Err(Error::AlreadyConnected)));
        panel.send_editor().unwrap();
        panel.disconnect();
        assert_eq!(next(&rx), Event::SerialDisconnected);
        assert_eq!(panel.link_state(), LinkState::Disconnected);

        // A new link per connection
        panel.connect().unwrap();
        assert_eq!(next(&rx), Event::SerialConnected);
    }

    #[test]
    fn test_preset_to_macro_playback() {
        let dir = tempfile::tempdir().unwrap();
        let (mut panel, rx) = panel(&dir);

        panel.set_editor_field(MotionField::Speed, 40);
        let walk = *panel.editor();
        panel.presets_mut().arm_save("Walk").unwrap();
        let key = SlotKey::new(0, 0).unwrap();
        assert_eq!(panel.click_preset(key).unwrap(), ClickOutcome::Saved(key));

        panel.clear_editor();
        assert_eq!(panel.click_preset(key).unwrap(), ClickOutcome::Load(walk));
        assert_eq!(panel.editor(), &walk);

        assert!(matches!(panel.insert_motion("Run"), Err(Error::UnknownMotion(_))));
        panel.insert_motion("Walk").unwrap();
        panel.insert_delay(0);
        panel.save_macro("demo").unwrap();
        assert_eq!(panel.macro_names().unwrap(), vec!["demo"]);

        assert!(matches!(panel.start_macro(), Err(Error::NotConnected)));
        panel.connect().unwrap();
        assert_eq!(next(&rx), Event::SerialConnected);
        panel.load_macro("demo").unwrap();
        panel.start_macro().unwrap();
        assert_eq!(
            next(&rx),
            Event::MacroFinished {
                cancelled: false
            }
        );
    }

    #[test]
    fn test_send_click_without_link_keeps_editor() {
        let dir = tempfile::tempdir().unwrap();
        let (mut panel, _rx) = panel(&dir);
        panel.set_editor_field(MotionField::HeadLeftRight, 90);
        let key = SlotKey::new(1, 0).unwrap();
        panel.presets_mut().arm_save("Look").unwrap();
        panel.click_preset(key).unwrap();

        panel.clear_editor();
        panel.presets_mut().set_click_action(ClickAction::Send);
        assert!(matches!(panel.click_preset(key), Err(Error::NotConnected)));
        assert_eq!(panel.editor(), &CommandFrame::default());
    }
}
