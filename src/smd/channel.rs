//! An open SMD channel as seen by one endpoint.

use bitflags::bitflags;
use log::{debug, info};

use super::alloc_table::ChannelName;
use super::half_channel::{ChannelState, Flag, HalfChannelSnapshot};
use super::ring::Ring;
use super::Smd;
use crate::doorbell::Doorbell;
use crate::error::{Result, SmdError};
use crate::platform::{Host, XferType, SMD_HEADER_SIZE};
use crate::sync::SpinLock;

bitflags! {
    /// What `poll` observed since the previous call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelEvents: u32 {
        /// Bytes are waiting to be read.
        const DATA = 1 << 0;
        /// The peer consumed bytes.
        const SPACE = 1 << 1;
        const OPEN = 1 << 2;
        const CLOSE = 1 << 3;
    }
}

bitflags! {
    /// Modem-control lines, numbered like the termios `TIOCM_*` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModemSignals: u32 {
        const DTR = 0x002;
        const RTS = 0x004;
        const CTS = 0x020;
        const CD = 0x040;
        const RI = 0x080;
        const DSR = 0x100;
    }
}

/// Upper bound on handshake steps per evaluation. The longest chain is
/// CLOSING then OPENING; OPENED always waits for the peer.
const HANDSHAKE_STEPS: usize = 3;

pub struct SmdChannel<'a, D: Doorbell> {
    smd: &'a Smd<D>,
    cid: u32,
    name: ChannelName,
    xfer: XferType,
    peer: Host,
    ring: Ring,
    /// Serializes handshake steps of this endpoint.
    handshake: SpinLock<()>,
}

impl<'a, D: Doorbell> SmdChannel<'a, D> {
    pub(super) fn open(
        smd: &'a Smd<D>,
        cid: u32,
        name: ChannelName,
        xfer: XferType,
        peer: Host,
        ring: Ring,
    ) -> Result<Self> {
        let ch = Self {
            smd,
            cid,
            name,
            xfer,
            peer,
            ring,
            handshake: SpinLock::new(()),
        };
        {
            let _guard = ch.handshake.lock();
            if matches!(ch.local_state()?, ChannelState::Closed | ChannelState::Closing) {
                ch.restart()?;
            }
            let acked = ch.acked()?;
            let remote_changed = ch.ring.recv().take_flag(Flag::State)?;
            ch.evaluate(acked, remote_changed)?;
        }
        info!("smd: opened ch{} '{}' to {}", cid, ch.name, peer.name());
        Ok(ch)
    }

    #[inline]
    pub fn cid(&self) -> u32 {
        self.cid
    }

    #[inline]
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    #[inline]
    pub fn xfer_type(&self) -> XferType {
        self.xfer
    }

    #[inline]
    pub fn peer(&self) -> Host {
        self.peer
    }

    pub fn local_state(&self) -> Result<ChannelState> {
        self.ring.send().state()
    }

    pub fn remote_state(&self) -> Result<ChannelState> {
        self.ring.recv().state()
    }

    pub fn is_open(&self) -> Result<bool> {
        Ok(self.local_state()? == ChannelState::Opened)
    }

    /// Bytes available to `read`.
    pub fn read_avail(&self) -> Result<usize> {
        self.ring.read_avail()
    }

    /// Bytes `write` can queue right now.
    pub fn write_avail(&self) -> Result<usize> {
        self.ring.write_avail()
    }

    /// `write_avail` of an empty ring.
    pub fn max_write(&self) -> usize {
        self.ring.max_write()
    }

    /// Queue data. Stream channels accept a prefix of `data`; packet
    /// channels queue the whole packet or nothing.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        match self.xfer {
            XferType::Stream => self.write_stream(data),
            XferType::Packet => self.write_packet(data),
        }
    }

    /// Read pending data. Packet channels return one whole packet.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self.xfer {
            XferType::Stream => self.read_stream(buf),
            XferType::Packet => self.read_packet(buf),
        }
    }

    fn write_stream(&self, data: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let n = self.ring.write(data)?;
        if n > 0 {
            self.data_written()?;
        }
        Ok(n)
    }

    fn read_stream(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        let n = self.ring.read(buf)?;
        if n > 0 {
            self.data_consumed()?;
        }
        Ok(n)
    }

    /// Queue a framed packet: a 20-byte header carrying the length, then
    /// the payload. Returns 0 if the ring cannot take all of it now.
    pub fn write_packet(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(SmdError::InvalidArgument("empty packet"));
        }
        let framed = data.len() + SMD_HEADER_SIZE;
        if framed > self.ring.max_write() {
            return Err(SmdError::CapacityExceeded {
                requested: framed,
                capacity: self.ring.max_write(),
            });
        }
        self.check_writable()?;
        if self.ring.write_avail()? < framed {
            return Ok(0);
        }

        let mut header = [0u8; SMD_HEADER_SIZE];
        header[..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
        self.ring.write(&header)?;
        self.ring.write(data)?;
        self.data_written()?;
        Ok(data.len())
    }

    /// Length of the packet at the front of the ring, 0 if no header has
    /// arrived yet.
    pub fn packet_size(&self) -> Result<usize> {
        Ok(self.front_packet()?.unwrap_or(0))
    }

    /// Read one complete packet into `buf`. Returns 0 while the packet is
    /// still arriving.
    pub fn read_packet(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        let len = match self.front_packet()? {
            Some(len) => len,
            None => return Ok(0),
        };
        if self.ring.read_avail()? < SMD_HEADER_SIZE + len {
            return Ok(0);
        }
        if buf.len() < len {
            return Err(SmdError::CapacityExceeded { requested: len, capacity: buf.len() });
        }
        self.ring.consume(SMD_HEADER_SIZE)?;
        let n = self.ring.read(&mut buf[..len])?;
        self.data_consumed()?;
        Ok(n)
    }

    fn front_packet(&self) -> Result<Option<usize>> {
        let mut header = [0u8; SMD_HEADER_SIZE];
        if self.ring.peek(&mut header)? < SMD_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len.saturating_add(SMD_HEADER_SIZE) > self.ring.max_write() {
            log::warn!("smd: ch{} packet header claims {} bytes", self.cid, len);
            return Err(SmdError::Corrupt("packet length exceeds fifo"));
        }
        Ok(Some(len))
    }

    /// Consume the flags the peer raised, advance the open/close
    /// handshake and report what happened.
    pub fn poll(&self) -> Result<ChannelEvents> {
        let recv = self.ring.recv();
        let (mut events, space) = {
            let _guard = self.handshake.lock();
            // Read before taking the peer's flags: once our state change is
            // consumed, the peer's own OPENING notification is already up.
            let acked = self.acked()?;
            let _ = recv.take_flag(Flag::Head)?;
            let space = recv.take_flag(Flag::Tail)?;
            let remote_changed = recv.take_flag(Flag::State)?;
            (self.evaluate(acked, remote_changed)?, space)
        };

        if matches!(self.local_state()?, ChannelState::Opened | ChannelState::Closing) {
            if self.ring.read_avail()? > 0 {
                events |= ChannelEvents::DATA;
            }
            if space && self.ring.write_avail()? > 0 {
                events |= ChannelEvents::SPACE;
            }
        }
        Ok(events)
    }

    /// DSR/CTS/CD/RI as raised by the peer, RTS/DTR as raised locally.
    pub fn tiocmget(&self) -> Result<ModemSignals> {
        let (send, recv) = (self.ring.send(), self.ring.recv());
        let mut out = ModemSignals::empty();
        out.set(ModemSignals::DSR, recv.flag(Flag::Dsr)?);
        out.set(ModemSignals::CTS, recv.flag(Flag::Cts)?);
        out.set(ModemSignals::CD, recv.flag(Flag::Cd)?);
        out.set(ModemSignals::RI, recv.flag(Flag::Ri)?);
        out.set(ModemSignals::RTS, send.flag(Flag::Cts)?);
        out.set(ModemSignals::DTR, send.flag(Flag::Dsr)?);
        Ok(out)
    }

    /// Raise or drop DTR/RTS on the send half.
    pub fn tiocmset(&self, set: ModemSignals, clear: ModemSignals) -> Result<()> {
        let send = self.ring.send();
        if set.contains(ModemSignals::DTR) {
            send.set_flag(Flag::Dsr, true)?;
        }
        if set.contains(ModemSignals::RTS) {
            send.set_flag(Flag::Cts, true)?;
        }
        if clear.contains(ModemSignals::DTR) {
            send.set_flag(Flag::Dsr, false)?;
        }
        if clear.contains(ModemSignals::RTS) {
            send.set_flag(Flag::Cts, false)?;
        }
        send.set_flag(Flag::State, true)?;
        self.notify()
    }

    /// Ask the peer not to interrupt us when it writes.
    pub fn set_read_interrupt_blocked(&self, blocked: bool) -> Result<()> {
        self.ring.send().set_flag(Flag::BlockReadIntr, blocked)
    }

    /// `(send, recv)` descriptors.
    pub fn snapshot(&self) -> Result<(HalfChannelSnapshot, HalfChannelSnapshot)> {
        Ok((self.ring.send().snapshot()?, self.ring.recv().snapshot()?))
    }

    /// Publish CLOSED and drop this endpoint's table reference.
    pub fn close(self) -> Result<()> {
        {
            let _guard = self.handshake.lock();
            self.set_state(ChannelState::Closed)?;
        }
        let refs = self.smd.alloc_table().release(self.cid)?;
        info!("smd: closed ch{} '{}' ({} refs left)", self.cid, self.name, refs);
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match self.local_state()? {
            ChannelState::Opened => Ok(()),
            _ => Err(SmdError::ProtocolOrder("write before channel opened")),
        }
    }

    fn check_readable(&self) -> Result<()> {
        match self.local_state()? {
            ChannelState::Opened | ChannelState::Closing => Ok(()),
            _ => Err(SmdError::ProtocolOrder("read on a channel that is not open")),
        }
    }

    fn data_written(&self) -> Result<()> {
        self.ring.send().set_flag(Flag::Head, true)?;
        if self.ring.recv().flag(Flag::BlockReadIntr)? {
            return Ok(());
        }
        self.notify()
    }

    fn data_consumed(&self) -> Result<()> {
        self.ring.send().set_flag(Flag::Tail, true)?;
        self.notify()
    }

    fn notify(&self) -> Result<()> {
        self.smd.signal(self.peer)
    }

    fn set_state(&self, state: ChannelState) -> Result<()> {
        let send = self.ring.send();
        let up = state == ChannelState::Opened;
        send.set_flag(Flag::Dsr, up)?;
        send.set_flag(Flag::Cts, up)?;
        send.set_flag(Flag::Cd, up)?;
        send.set_state(state)?;
        send.set_flag(Flag::State, true)?;
        debug!("smd: ch{} -> {}", self.cid, state.name());
        self.notify()
    }

    /// Whether the peer has consumed our last state notification.
    fn acked(&self) -> Result<bool> {
        Ok(!self.ring.send().flag(Flag::State)?)
    }

    /// Empty both directions and publish OPENING.
    fn restart(&self) -> Result<()> {
        self.ring.reset_local()?;
        self.ring.send().set_flag(Flag::BlockReadIntr, false)?;
        self.set_state(ChannelState::Opening)
    }

    /// Advance the handshake from the current (local, remote) state pair
    /// until it settles. `acked` is whether the peer consumed our last
    /// state notification, `remote_changed` whether the peer raised a new
    /// one since the previous evaluation.
    fn evaluate(&self, mut acked: bool, mut remote_changed: bool) -> Result<ChannelEvents> {
        let mut events = ChannelEvents::empty();
        for _ in 0..HANDSHAKE_STEPS {
            match self.step(acked, remote_changed)? {
                Some(step) => events |= step,
                None => break,
            }
            // Every step published a new state of ours.
            acked = false;
            remote_changed = false;
        }
        Ok(events)
    }

    fn step(&self, acked: bool, remote_changed: bool) -> Result<Option<ChannelEvents>> {
        use ChannelState::*;

        let events = match (self.local_state()?, self.remote_state()?) {
            // The peer (re)opened while we were down or draining.
            (Closed | Closing, Opening | ResetOpening) => {
                self.restart()?;
                ChannelEvents::empty()
            }
            // OPENED only once the peer has seen our OPENING; an OPENED
            // remote left over from an earlier session does not count.
            (Opening, Opening | Opened | ResetOpening) if acked => {
                self.set_state(Opened)?;
                ChannelEvents::OPEN
            }
            (Opened, Closed | Closing | Reset) => {
                self.set_state(Closing)?;
                ChannelEvents::CLOSE
            }
            // A fresh OPENING from the peer means it reset its side.
            (Opened, Opening | ResetOpening) if remote_changed => {
                self.set_state(Closing)?;
                ChannelEvents::CLOSE
            }
            _ => return Ok(None),
        };
        Ok(Some(events))
    }
}
