//! Task and mailbox lookup, built once during bring-up.
//!
//! [`Resources`] is created before any task runs and handed to every
//! manager as a `&'static` reference. Nothing in it is ever replaced, so
//! tasks read it without locking.

use alloc::boxed::Box;

use crate::{
    event::{ControlEvent, DisplayEvent, Origin, PacketEvent, SystemEvent},
    mailbox::Mailbox,
    memlog::{Level, MemLog},
    notify::Notifier,
    task::host_link::{Frame, HOST_RX_CAPACITY},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    System,
    Control,
    Display,
    Packet,
}

impl TaskId {
    pub const COUNT: usize = 4;

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl From<Origin> for TaskId {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Control => TaskId::Control,
            Origin::Display => TaskId::Display,
            Origin::Packet => TaskId::Packet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxId {
    System,
    Control,
    Display,
    Packet,
    HostRx,
}

pub type SharedResources = &'static Resources;

pub struct Resources {
    pub system: Mailbox<SystemEvent>,
    pub control: Mailbox<ControlEvent>,
    pub display: Mailbox<DisplayEvent>,
    pub packet: Mailbox<PacketEvent>,
    /// Complete host frames, from the host receiver to the packet task.
    pub host_rx: Mailbox<Frame, HOST_RX_CAPACITY>,
    pub log: MemLog,
    notifiers: [Notifier; TaskId::COUNT],
}

impl Resources {
    pub fn new(log: MemLog) -> Self {
        Self {
            system: Mailbox::new(MailboxId::System),
            control: Mailbox::new(MailboxId::Control),
            display: Mailbox::new(MailboxId::Display),
            packet: Mailbox::new(MailboxId::Packet),
            host_rx: Mailbox::new(MailboxId::HostRx),
            log,
            notifiers: [const { Notifier::new() }; TaskId::COUNT],
        }
    }

    pub fn notifier(&self, task: TaskId) -> &Notifier {
        &self.notifiers[task.index()]
    }

    pub fn depth(&self, mailbox: MailboxId) -> usize {
        match mailbox {
            MailboxId::System => self.system.depth(),
            MailboxId::Control => self.control.depth(),
            MailboxId::Display => self.display.depth(),
            MailboxId::Packet => self.packet.depth(),
            MailboxId::HostRx => self.host_rx.depth(),
        }
    }

    pub fn dropped(&self, mailbox: MailboxId) -> usize {
        match mailbox {
            MailboxId::System => self.system.dropped(),
            MailboxId::Control => self.control.dropped(),
            MailboxId::Display => self.display.dropped(),
            MailboxId::Packet => self.packet.dropped(),
            MailboxId::HostRx => self.host_rx.dropped(),
        }
    }
}

/// Builds the shared resources. Call once, before spawning any task.
pub fn init(log_capacity: usize, log_level: Level) -> SharedResources {
    Box::leak(Box::new(Resources::new(MemLog::new(log_capacity, log_level))))
}
