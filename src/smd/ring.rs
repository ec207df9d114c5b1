//! Byte ring over a pair of half-channels.
//!
//! The producer owns `head` of its send half and the consumer owns `tail`
//! of the same half. One byte stays unused so that `head == tail` always
//! means empty. Payload is copied before the index store, and the index
//! store has release ordering, so a peer that observes the new index also
//! observes the bytes.

use super::half_channel::HalfChannel;
use crate::error::{Result, SmdError};
use crate::region::SharedRegion;

/// Data area of one direction.
#[derive(Clone, Copy)]
pub struct Fifo {
    region: SharedRegion,
    offset: usize,
    size: u32,
}

impl Fifo {
    /// `size` must be a power of two.
    pub fn new(region: SharedRegion, offset: usize, size: u32) -> Result<Self> {
        if !size.is_power_of_two() || size < 2 {
            return Err(SmdError::InvalidArgument("fifo size must be a power of two"));
        }
        region.check(offset, size as usize)?;
        Ok(Self { region, offset, size })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    fn mask(&self) -> u32 {
        self.size - 1
    }

    /// Copy `data` in at ring position `pos`, splitting at the wrap point.
    fn copy_in(&self, pos: u32, data: &[u8]) -> Result<()> {
        let pos = pos as usize;
        let first = data.len().min(self.size as usize - pos);
        self.region.write_bytes(self.offset + pos, &data[..first])?;
        if first < data.len() {
            self.region.write_bytes(self.offset, &data[first..])?;
        }
        Ok(())
    }

    fn copy_out(&self, pos: u32, buf: &mut [u8]) -> Result<()> {
        let pos = pos as usize;
        let first = buf.len().min(self.size as usize - pos);
        let (head, rest) = buf.split_at_mut(first);
        self.region.read_bytes(self.offset + pos, head)?;
        if !rest.is_empty() {
            self.region.read_bytes(self.offset, rest)?;
        }
        Ok(())
    }
}

/// One endpoint's view of a channel's two directions.
#[derive(Clone, Copy)]
pub struct Ring {
    send: HalfChannel,
    recv: HalfChannel,
    tx: Fifo,
    rx: Fifo,
}

impl Ring {
    pub fn new(send: HalfChannel, recv: HalfChannel, tx: Fifo, rx: Fifo) -> Result<Self> {
        if tx.size() != rx.size() {
            return Err(SmdError::InvalidArgument("fifo sizes differ"));
        }
        Ok(Self { send, recv, tx, rx })
    }

    #[inline]
    pub fn send(&self) -> &HalfChannel {
        &self.send
    }

    #[inline]
    pub fn recv(&self) -> &HalfChannel {
        &self.recv
    }

    /// Bytes per direction, including the reserved byte.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.tx.size()
    }

    /// Largest single write the ring can ever accept.
    #[inline]
    pub fn max_write(&self) -> usize {
        self.tx.mask() as usize
    }

    pub fn read_avail(&self) -> Result<usize> {
        let (head, tail) = self.rx_indices()?;
        Ok((head.wrapping_sub(tail) & self.rx.mask()) as usize)
    }

    pub fn write_avail(&self) -> Result<usize> {
        let (head, tail) = self.tx_indices()?;
        let mask = self.tx.mask();
        Ok((mask - (head.wrapping_sub(tail) & mask)) as usize)
    }

    /// Copy as much of `data` as fits. Returns the number of bytes queued.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.len() > self.max_write() {
            return Err(SmdError::CapacityExceeded {
                requested: data.len(),
                capacity: self.max_write(),
            });
        }
        let (head, tail) = self.tx_indices()?;
        let mask = self.tx.mask();
        let avail = (mask - (head.wrapping_sub(tail) & mask)) as usize;
        let n = data.len().min(avail);
        if n == 0 {
            return Ok(0);
        }
        self.tx.copy_in(head, &data[..n])?;
        self.send.set_head((head + n as u32) & mask)?;
        Ok(n)
    }

    /// Copy pending bytes out without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        let (head, tail) = self.rx_indices()?;
        let avail = (head.wrapping_sub(tail) & self.rx.mask()) as usize;
        let n = buf.len().min(avail);
        self.rx.copy_out(tail, &mut buf[..n])?;
        Ok(n)
    }

    /// Copy pending bytes out and release their space to the producer.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = self.peek(buf)?;
        if n > 0 {
            self.consume(n)?;
        }
        Ok(n)
    }

    /// Drop `count` pending bytes. `count` must not exceed `read_avail()`.
    pub fn consume(&self, count: usize) -> Result<()> {
        let (head, tail) = self.rx_indices()?;
        let mask = self.rx.mask();
        if count > (head.wrapping_sub(tail) & mask) as usize {
            return Err(SmdError::InvalidArgument("consume past available data"));
        }
        self.recv.set_tail((tail + count as u32) & mask)
    }

    /// Reset the indices this endpoint owns.
    pub fn reset_local(&self) -> Result<()> {
        self.send.set_head(0)?;
        self.recv.set_tail(0)
    }

    fn tx_indices(&self) -> Result<(u32, u32)> {
        let head = self.send.head()?;
        let tail = self.send.tail()?;
        check_index(head, self.tx.size())?;
        check_index(tail, self.tx.size())?;
        Ok((head, tail))
    }

    fn rx_indices(&self) -> Result<(u32, u32)> {
        let head = self.recv.head()?;
        let tail = self.recv.tail()?;
        check_index(head, self.rx.size())?;
        check_index(tail, self.rx.size())?;
        Ok((head, tail))
    }
}

#[inline]
fn check_index(index: u32, size: u32) -> Result<()> {
    if index >= size {
        log::warn!("smd: ring index {:#x} outside fifo of {:#x}", index, size);
        return Err(SmdError::Corrupt("ring index outside fifo"));
    }
    Ok(())
}
