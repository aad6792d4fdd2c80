//! The N: command processor.
//!
//! One instance services one bus device ID. It decodes command frames,
//! owns the lifecycle of the active protocol handler and its document
//! views, and drives the interrupt rate limiter. The device is either
//! idle (no handler) or open (exactly one handler wired to the shared
//! channel buffers).

use std::time::Duration;

use tracing::{debug, trace};

use crate::bus::BusIo;
use crate::devicespec::{self, Prefix};
use crate::error::{AdapterError, NetworkError};
use crate::frame::{dstats, opcode, CommandFrame, EOL, SPECIAL_PAYLOAD};
use crate::interrupt::InterruptTimer;
use crate::protocol::{ChannelBuffers, Credentials, NetworkProtocol, ProtocolRegistry};
use crate::status::NetworkStatus;
use crate::url::ParsedUrl;
use crate::view::{JsonView, NeonCompiler};

/// Bus device ID of the first N: unit.
pub const DEFAULT_DEVICE_ID: u8 = 0x71;

/// Host write staging buffer size; covers the largest aux-encoded length.
const SCRATCH_SIZE: usize = 65535;

/// Directory-open aux1 value; such Opens get wildcard treatment.
const AUX1_DIRECTORY: u8 = 6;

/// Local interface addresses reported by Status while no channel is open.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct NetInfo {
    pub ip: [u8; 4],
    pub netmask: [u8; 4],
    pub gateway: [u8; 4],
    pub dns: [u8; 4],
}

/// Which view services channel reads, writes, and status.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ChannelMode {
    #[default]
    Protocol,
    Json,
    Neon,
}

/// Everything that exists only while a channel is open. Dropping it drops
/// the handler and views together, never the buffers they point into.
struct OpenChannel {
    handler: Box<dyn NetworkProtocol>,
    json: JsonView,
    neon: NeonCompiler,
    mode: ChannelMode,
    json_remaining: usize,
    neon_remaining: usize,
    scratch: Vec<u8>,
}

/// The N: device state machine.
pub struct NetworkDevice {
    device_id: u8,
    buffers: ChannelBuffers,
    registry: ProtocolRegistry,
    channel: Option<OpenChannel>,
    status: NetworkStatus,
    prefix: Prefix,
    credentials: Credentials,
    timer: InterruptTimer,
    net_info: NetInfo,
    url: Option<ParsedUrl>,
    spec: String,
    trans_aux2: u8,
    open_aux1: u8,
    open_aux2: u8,
    saved_connected: u8,
    saved_error: u8,
    high_speed_index: u8,
}

impl NetworkDevice {
    pub fn new(device_id: u8, registry: ProtocolRegistry) -> Self {
        Self {
            device_id,
            buffers: ChannelBuffers::new(),
            registry,
            channel: None,
            status: NetworkStatus::default(),
            prefix: Prefix::default(),
            credentials: Credentials::default(),
            timer: InterruptTimer::new(),
            net_info: NetInfo::default(),
            url: None,
            spec: String::new(),
            trans_aux2: 0,
            open_aux1: 0,
            open_aux2: 0,
            saved_connected: 0,
            saved_error: 0,
            high_speed_index: 0,
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn set_net_info(&mut self, info: NetInfo) {
        self.net_info = info;
    }

    pub fn set_high_speed_index(&mut self, index: u8) {
        self.high_speed_index = index;
    }

    /// Whether a channel is currently open.
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Whether the interrupt rate limiter is armed.
    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.channel.as_ref().map(|c| c.mode).unwrap_or_default()
    }

    /// The latched channel status as of the last poll or command.
    pub fn network_status(&self) -> NetworkStatus {
        self.status
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_str()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The devicespec most recently normalized, for diagnostics.
    pub fn last_spec(&self) -> &str {
        &self.spec
    }

    /// The aux bytes persisted from the last Open, translation applied.
    pub fn open_aux(&self) -> (u8, u8) {
        (self.open_aux1, self.open_aux2)
    }

    /// Connection and error bytes latched by the last interrupt poll.
    pub fn saved_status(&self) -> (u8, u8) {
        (self.saved_connected, self.saved_error)
    }

    pub fn url(&self) -> Option<&ParsedUrl> {
        self.url.as_ref()
    }

    /// Service one command frame. Every well-formed frame is acknowledged
    /// and answered with exactly one COMPLETE or ERROR; NAK is reserved
    /// for unsupported special transfers.
    pub fn process(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        debug!(
            device = frame.device,
            command = frame.command,
            aux1 = frame.aux1,
            aux2 = frame.aux2,
            "command"
        );
        match frame.command {
            opcode::HIGH_SPEED => {
                bus.ack();
                self.cmd_high_speed(bus);
            }
            opcode::OPEN => self.cmd_open(frame, bus),
            opcode::CLOSE => self.cmd_close(bus),
            opcode::READ => self.cmd_read(frame, bus),
            opcode::WRITE => self.cmd_write(frame, bus),
            opcode::STATUS => self.cmd_status(frame, bus),
            opcode::SPECIAL_INQUIRY => self.cmd_special_inquiry(frame, bus),
            _ => self.cmd_special(frame, bus),
        }
    }

    /// Main-loop poll: drive PROCEED from the timer phase when the live
    /// handler warrants an interrupt.
    pub fn poll_interrupt(&mut self, bus: &mut dyn BusIo) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if !channel.handler.flags().interrupt_enable {
            return;
        }
        if channel.handler.flags().force_status {
            bus.set_proceed(self.timer.phase());
            return;
        }

        channel.handler.flags_mut().from_interrupt = true;
        channel.handler.status(&mut self.status);
        channel.handler.flags_mut().from_interrupt = false;

        if self.status.rx_bytes_waiting > 0 || self.status.connected == 0 {
            bus.set_proceed(self.timer.phase());
        }

        self.saved_connected = self.status.connected;
        self.saved_error = self.status.error;
    }

    /// Latch a failure's status code and signal ERROR.
    fn fail(&mut self, bus: &mut dyn BusIo, e: AdapterError) {
        debug!(error = %e, "command failed");
        self.status.set_error(e.status_code());
        bus.error();
    }

    fn cmd_open(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        bus.ack();

        let mut frame = frame;
        self.open_aux1 = frame.aux1;
        self.open_aux2 = frame.aux2 | self.trans_aux2;
        frame.aux2 |= self.trans_aux2;

        // A fresh Open supersedes any channel still live.
        self.timer.stop();
        if let Some(mut stale) = self.channel.take() {
            stale.handler.close();
        }
        self.url = None;
        self.status.reset();

        let (mut handler, url) = match self.parse_and_instantiate(&frame, bus) {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(bus, e);
                return;
            }
        };

        if handler.open(&url, &frame) {
            self.status.set_error(handler.error());
            debug!(error = ?handler.error(), "protocol could not connect");
            bus.error();
            return;
        }

        // Forced so the first tick after Open always interrupts.
        handler.flags_mut().force_status = true;
        self.timer.start();
        self.url = Some(url);
        self.channel = Some(OpenChannel {
            handler,
            json: JsonView::new(),
            neon: NeonCompiler::new(),
            mode: ChannelMode::Protocol,
            json_remaining: 0,
            neon_remaining: 0,
            scratch: vec![0; SCRATCH_SIZE],
        });
        bus.complete();
    }

    fn cmd_close(&mut self, bus: &mut dyn BusIo) {
        bus.ack();
        self.status.reset();
        self.url = None;

        // The rate timer keeps running here; the next Open's prelude
        // stops it.
        let Some(mut channel) = self.channel.take() else {
            bus.complete();
            return;
        };
        if channel.handler.close() {
            bus.error();
        } else {
            bus.complete();
        }
    }

    fn cmd_read(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        let n = usize::from(frame.aux());
        bus.ack();

        let Some(channel) = self.channel.as_mut() else {
            self.fail(bus, AdapterError::State("read with no open channel"));
            return;
        };

        let err = match channel.mode {
            ChannelMode::Protocol => channel.handler.read(n),
            ChannelMode::Json => {
                channel.json_remaining = channel.json_remaining.saturating_sub(n);
                false
            }
            ChannelMode::Neon => {
                channel.neon_remaining = channel.neon_remaining.saturating_sub(n);
                false
            }
        };

        let mut payload = {
            let mut rx = self.buffers.receive.borrow_mut();
            let take = n.min(rx.len());
            rx.split_to(take).to_vec()
        };
        payload.resize(n, 0);
        bus.to_host(&payload, err);
    }

    fn cmd_write(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        let n = usize::from(frame.aux());
        bus.ack();

        let Some(channel) = self.channel.as_mut() else {
            self.fail(bus, AdapterError::State("write with no open channel"));
            return;
        };
        if n > channel.scratch.len() {
            self.fail(
                bus,
                AdapterError::Resource(format!("write of {n} bytes exceeds staging buffer")),
            );
            return;
        }

        bus.from_host(&mut channel.scratch[..n]);
        self.buffers
            .transmit
            .borrow_mut()
            .extend_from_slice(&channel.scratch[..n]);

        let err = match channel.mode {
            ChannelMode::Protocol => channel.handler.write(n),
            ChannelMode::Json | ChannelMode::Neon => {
                trace!("write not handled by document views");
                true
            }
        };
        if err {
            bus.error();
        } else {
            bus.complete();
        }
    }

    fn cmd_status(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        bus.ack();
        if self.channel.is_some() {
            self.status_channel(bus);
        } else {
            self.status_local(frame, bus);
        }
    }

    fn status_local(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        let payload = match frame.aux2 {
            1 => self.net_info.ip,
            2 => self.net_info.netmask,
            3 => self.net_info.gateway,
            4 => self.net_info.dns,
            _ => [0, 0, self.status.connected, self.status.error],
        };
        bus.to_host(&payload, false);
    }

    fn status_channel(&mut self, bus: &mut dyn BusIo) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let err = match channel.mode {
            ChannelMode::Protocol => channel.handler.status(&mut self.status),
            ChannelMode::Json => {
                view_status(&mut self.status, channel.json_remaining);
                false
            }
            ChannelMode::Neon => {
                view_status(&mut self.status, channel.neon_remaining);
                false
            }
        };
        // First status after Open clears the forced-interrupt flag.
        channel.handler.flags_mut().force_status = false;

        let wire = self.status.to_wire();
        trace!(
            rx = self.status.rx_bytes_waiting,
            connected = self.status.connected,
            error = self.status.error,
            "channel status"
        );
        bus.to_host(&wire, err);
    }

    fn cmd_special_inquiry(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        bus.ack();
        let d = self.inquire(frame.aux1);
        bus.to_host(&[d], false);
    }

    fn cmd_special(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        match self.inquire(frame.command) {
            dstats::NONE => {
                bus.ack();
                self.special_00(frame, bus);
            }
            dstats::TO_HOST => {
                bus.ack();
                self.special_40(frame, bus);
            }
            dstats::TO_PERIPHERAL => {
                bus.ack();
                self.special_80(frame, bus);
            }
            _ => bus.nak(),
        }
    }

    /// Ask the handler for the payload direction of `cmd`, falling back to
    /// the device-global table.
    fn inquire(&mut self, cmd: u8) -> u8 {
        let mut d = dstats::UNSUPPORTED;
        if let Some(channel) = self.channel.as_mut() {
            d = channel.handler.special_inquiry(cmd);
        }
        if d == dstats::UNSUPPORTED {
            d = self.default_inquiry(cmd);
        }
        trace!(cmd, dstats = d, "inquiry");
        d
    }

    fn default_inquiry(&self, cmd: u8) -> u8 {
        let mode = self.channel_mode();
        match cmd {
            opcode::RENAME
            | opcode::DELETE
            | opcode::LOCK
            | opcode::UNLOCK
            | opcode::MKDIR
            | opcode::RMDIR
            | opcode::SET_PREFIX
            | opcode::SET_LOGIN
            | opcode::SET_PASSWORD => dstats::TO_PERIPHERAL,
            opcode::SET_CHANNEL_MODE => dstats::NONE,
            opcode::GET_PREFIX => dstats::TO_HOST,
            opcode::SET_TIMER_RATE | opcode::SET_TRANSLATION => dstats::NONE,
            opcode::PARSE_JSON if mode == ChannelMode::Json => dstats::NONE,
            opcode::SET_JSON_QUERY if mode == ChannelMode::Json => dstats::TO_PERIPHERAL,
            opcode::COMPILE_ADF if mode == ChannelMode::Neon => dstats::NONE,
            _ => dstats::UNSUPPORTED,
        }
    }

    fn special_00(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        match frame.command {
            opcode::PARSE_JSON if self.channel_mode() == ChannelMode::Json => {
                self.parse_json(bus)
            }
            opcode::COMPILE_ADF if self.channel_mode() == ChannelMode::Neon => {
                self.parse_adf(bus)
            }
            opcode::SET_TRANSLATION => {
                self.trans_aux2 = frame.aux2;
                bus.complete();
            }
            opcode::SET_TIMER_RATE => self.set_timer_rate(frame, bus),
            opcode::SET_CHANNEL_MODE => self.set_channel_mode(frame, bus),
            _ => match self.channel.as_mut() {
                Some(channel) => {
                    if channel.handler.special_00(&frame) {
                        bus.error();
                    } else {
                        bus.complete();
                    }
                }
                None => self.fail(bus, AdapterError::State("special with no open channel")),
            },
        }
    }

    fn special_40(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        if frame.command == opcode::GET_PREFIX {
            self.get_prefix(bus);
            return;
        }

        let mut buf = [0u8; SPECIAL_PAYLOAD];
        let Some(channel) = self.channel.as_mut() else {
            self.status.set_error(NetworkError::NOT_CONNECTED);
            bus.to_host(&buf, true);
            return;
        };
        {
            let rx = self.buffers.receive.borrow();
            let take = rx.len().min(SPECIAL_PAYLOAD);
            buf[..take].copy_from_slice(&rx[..take]);
        }
        let err = channel.handler.special_40(&mut buf, &frame);
        bus.to_host(&buf, err);
    }

    fn special_80(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        match frame.command {
            opcode::RENAME
            | opcode::DELETE
            | opcode::LOCK
            | opcode::UNLOCK
            | opcode::MKDIR
            | opcode::RMDIR => self.idempotent_80(frame, bus),
            opcode::SET_PREFIX => self.set_prefix(bus),
            opcode::SET_JSON_QUERY if self.channel_mode() == ChannelMode::Json => {
                self.set_json_query(frame, bus)
            }
            opcode::SET_LOGIN => self.set_login(bus),
            opcode::SET_PASSWORD => self.set_password(bus),
            _ => {
                let mut buf = [0u8; SPECIAL_PAYLOAD];
                bus.from_host(&mut buf);
                match self.channel.as_mut() {
                    Some(channel) => {
                        if channel.handler.special_80(&buf, &frame) {
                            bus.error();
                        } else {
                            bus.complete();
                        }
                    }
                    None => self.fail(bus, AdapterError::State("special with no open channel")),
                }
            }
        }
    }

    fn cmd_high_speed(&mut self, bus: &mut dyn BusIo) {
        bus.to_host(&[self.high_speed_index], false);
    }

    /// Read the devicespec payload, normalize it, parse the URL, and
    /// instantiate the matching handler.
    fn parse_and_instantiate(
        &mut self,
        frame: &CommandFrame,
        bus: &mut dyn BusIo,
    ) -> Result<(Box<dyn NetworkProtocol>, ParsedUrl), AdapterError> {
        let mut raw = [0u8; SPECIAL_PAYLOAD];
        bus.from_host(&mut raw);
        let spec = devicespec::from_payload(&raw);
        let normalized = devicespec::normalize(
            &spec,
            self.device_id,
            frame.aux1 == AUX1_DIRECTORY,
            &self.prefix,
        );
        debug!(spec = %spec, normalized = %normalized, "devicespec");
        self.spec = normalized.clone();

        let url = ParsedUrl::parse(&normalized);
        if !url.is_valid() {
            debug!(spec = %normalized, "invalid devicespec");
            return Err(AdapterError::Spec(normalized));
        }

        match self
            .registry
            .create(&url.scheme, &self.buffers, &self.credentials)
        {
            Some(handler) => Ok((handler, url)),
            None => {
                debug!(scheme = %url.scheme, "no protocol for scheme");
                Err(AdapterError::Protocol {
                    code: NetworkError::GENERAL,
                })
            }
        }
    }

    fn idempotent_80(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        match self.parse_and_instantiate(&frame, bus) {
            Ok((mut handler, url)) => {
                if handler.perform_idempotent_80(&url, &frame) {
                    debug!(command = frame.command, "idempotent special failed");
                    bus.error();
                } else {
                    bus.complete();
                }
            }
            Err(e) => self.fail(bus, e),
        }
    }

    fn parse_json(&mut self, bus: &mut dyn BusIo) {
        let Some(channel) = self.channel.as_mut() else {
            self.fail(bus, AdapterError::State("parse with no open channel"));
            return;
        };
        channel.json.parse(channel.handler.as_mut(), &self.buffers);
        bus.complete();
    }

    fn parse_adf(&mut self, bus: &mut dyn BusIo) {
        let Some(channel) = self.channel.as_mut() else {
            self.fail(bus, AdapterError::State("parse with no open channel"));
            return;
        };
        channel.neon.parse(channel.handler.as_mut(), &self.buffers);
        let len = channel.neon.doc_len();
        channel.neon_remaining = len;
        self.buffers
            .receive
            .borrow_mut()
            .extend_from_slice(channel.neon.doc());
        bus.complete();
    }

    fn set_json_query(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        let mut buf = [0u8; SPECIAL_PAYLOAD];
        bus.from_host(&mut buf);
        for b in buf.iter_mut() {
            if matches!(*b, 0x0A | 0x0D | EOL) {
                *b = 0;
            }
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let text = String::from_utf8_lossy(&buf[..end]).into_owned();

        let Some(pos) = text.rfind(':') else {
            bus.error();
            return;
        };
        let query = &text[pos + 1..];

        let Some(channel) = self.channel.as_mut() else {
            self.fail(bus, AdapterError::State("query with no open channel"));
            return;
        };
        channel.json.set_read_query(query, frame.aux2);
        channel.json_remaining = channel.json.value_len();
        self.buffers
            .receive
            .borrow_mut()
            .extend_from_slice(channel.json.value());
        debug!(query, len = channel.json_remaining, "json query set");
        bus.complete();
    }

    fn set_channel_mode(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        let Some(channel) = self.channel.as_mut() else {
            self.fail(bus, AdapterError::State("mode change with no open channel"));
            return;
        };
        match frame.aux2 {
            0 => channel.mode = ChannelMode::Protocol,
            1 => channel.mode = ChannelMode::Json,
            2 => channel.mode = ChannelMode::Neon,
            _ => {
                bus.error();
                return;
            }
        }
        bus.complete();
    }

    fn set_timer_rate(&mut self, frame: CommandFrame, bus: &mut dyn BusIo) {
        let rate = frame.aux();
        self.timer.set_rate(Duration::from_millis(u64::from(rate)));
        self.timer.stop();
        if self.channel.is_some() {
            self.timer.start();
        }
        debug!(rate_ms = rate, "timer rate set");
        bus.complete();
    }

    fn get_prefix(&mut self, bus: &mut dyn BusIo) {
        let mut buf = [0u8; SPECIAL_PAYLOAD];
        let prefix = self.prefix.as_str().as_bytes();
        let n = prefix.len().min(SPECIAL_PAYLOAD - 1);
        buf[..n].copy_from_slice(&prefix[..n]);
        buf[n] = EOL;
        bus.to_host(&buf, false);
    }

    fn set_prefix(&mut self, bus: &mut dyn BusIo) {
        let mut buf = [0u8; SPECIAL_PAYLOAD];
        bus.from_host(&mut buf);
        let payload = devicespec::from_payload(&buf);
        self.prefix.apply(&payload);
        bus.complete();
    }

    fn set_login(&mut self, bus: &mut dyn BusIo) {
        let mut buf = [0u8; SPECIAL_PAYLOAD];
        bus.from_host(&mut buf);
        self.credentials.login = devicespec::from_payload(&buf);
        bus.complete();
    }

    fn set_password(&mut self, bus: &mut dyn BusIo) {
        let mut buf = [0u8; SPECIAL_PAYLOAD];
        bus.from_host(&mut buf);
        self.credentials.password = devicespec::from_payload(&buf);
        bus.complete();
    }
}

fn view_status(status: &mut NetworkStatus, remaining: usize) {
    status.rx_bytes_waiting = remaining.min(usize::from(u16::MAX)) as u16;
    status.connected = u8::from(remaining > 0);
    status.error = if remaining > 0 {
        NetworkError::GENERAL.into()
    } else {
        NetworkError::END_OF_FILE.into()
    };
}

impl Drop for NetworkDevice {
    fn drop(&mut self) {
        self.timer.stop();
        if let Some(mut channel) = self.channel.take() {
            channel.handler.close();
        }
    }
}
