//! The driver boundary (§4.C, §6.1): the abstract contract every NIC/PHY
//! driver implements so the core never depends on a specific piece of
//! hardware.
//!
//! Everything on the far side of this trait — DMA rings, interrupt
//! controllers — is out of scope for this crate (§1), but SMI/MDIO access
//! is exposed through it (`read_phy_reg`/`write_phy_reg`) since link
//! autonegotiation state lives behind the same boundary. The core only
//! ever calls the operations below, and only ever receives frames back
//! through [`Stack::process_packet`](crate::Stack).

use alloc::boxed::Box;

use crate::buffer::PacketBuffer;
use crate::error::{Error, Result};

/// The link-layer framing a device speaks, used to pick the right
/// dispatch path in `processPacket` (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Ethernet,
    Ppp,
    SixLowPan,
    Loopback,
}

/// Capability flags a driver advertises at registration time (§6.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCapabilities {
    pub supports_irq: bool,
    pub supports_ethernet_checksum_offload: bool,
    pub supports_padding: bool,
    pub mtu: usize,
}

/// One perfect-match or multicast-hash filter slot, reference counted so
/// that two upper-layer joins to the same address don't fight over
/// removing the hardware entry (invariant #4 in §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacFilterEntry {
    pub mac: [u8; 6],
    pub ref_count: u32,
}

/// The abstract NIC contract (§4.C / §6.1). A driver registers one of
/// these per logical device; virtual (VLAN/port-tagged) interfaces do not
/// implement it themselves, they delegate to their parent's.
pub trait NetDevice: Send {
    fn kind(&self) -> DeviceKind;
    fn capabilities(&self) -> DeviceCapabilities;

    /// Brings hardware up, installs the MAC filter, enables DMA. Must not
    /// enable IRQs — that is a separate, explicit step.
    fn init(&mut self) -> Result<()>;

    /// Polled-link detection and other periodic housekeeping; called from
    /// the scheduler's NIC tick slot.
    fn tick(&mut self);

    /// Transmits one frame. May block up to `max_blocking` waiting for a
    /// free TX descriptor; returns `TransmitterBusy` on timeout rather than
    /// blocking forever.
    fn send_packet(&mut self, buf: &PacketBuffer, max_blocking: crate::Duration) -> Result<()>;

    /// Drains whatever frames the hardware has queued, calling `deliver`
    /// once per frame. Must only be invoked while NIC IRQs are masked.
    fn receive_packets(&mut self, deliver: &mut dyn FnMut(PacketBuffer));

    fn enable_irq(&mut self);
    fn disable_irq(&mut self);

    /// Reprograms hardware perfect-match slots and the multicast hash from
    /// the current filter table (only entries with `ref_count > 0`).
    fn update_mac_addr_filter(&mut self, entries: &[MacFilterEntry]) -> Result<()>;

    /// Reads one PHY register over MDIO/SMI (§6.1 `readPhyReg`).
    fn read_phy_reg(&mut self, reg: u8) -> Result<u16>;

    /// Writes one PHY register over MDIO/SMI (§6.1 `writePhyReg`).
    fn write_phy_reg(&mut self, reg: u8, value: u16) -> Result<()>;
}

/// A nestable IRQ mask/unmask guard, so the driver-event handling in the
/// scheduler main loop (§4.I step 1) can mask once even if called
/// re-entrantly from a callback.
pub struct IrqGuard<'a> {
    device: &'a mut dyn NetDevice,
}

impl<'a> IrqGuard<'a> {
    pub fn new(device: &'a mut dyn NetDevice) -> Self {
        device.disable_irq();
        IrqGuard { device }
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.device.enable_irq();
    }
}

/// Storage slot for a registered driver: the implementation plus the
/// type-tag and capabilities captured at registration, as described in
/// §6.1 ("Driver registers with NIC-type, MTU, and nine function
/// pointers... plus three capability booleans").
pub struct DriverBinding {
    pub device: Box<dyn NetDevice>,
    pub kind: DeviceKind,
    pub capabilities: DeviceCapabilities,
}

impl DriverBinding {
    pub fn new(device: Box<dyn NetDevice>) -> Self {
        let kind = device.kind();
        let capabilities = device.capabilities();
        DriverBinding {
            device,
            kind,
            capabilities,
        }
    }

    pub fn send(&mut self, buf: &PacketBuffer, max_blocking: crate::Duration) -> Result<()> {
        self.device.send_packet(buf, max_blocking)
    }
}

/// Returned by `send_packet` implementations to signal a TX-ring timeout;
/// kept here as a constant so drivers and the core agree on the mapping
/// without importing the full error enum at every call site.
pub const TRANSMITTER_BUSY: Error = Error::TransmitterBusy;
