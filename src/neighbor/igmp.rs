//! IGMP host state (§4.F): IPv4 analog of [`crate::neighbor::mld`].

use alloc::vec::Vec;

use crate::ipv4::Ipv4Address;
use crate::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgmpVersion {
    V2,
    V3,
}

struct GroupMembership {
    group: Ipv4Address,
    ref_count: u32,
    pending_reports: u32,
    next_report: Instant,
}

pub struct IgmpState {
    groups: Vec<GroupMembership>,
    version: IgmpVersion,
    unsolicited_report_interval: crate::Duration,
    robustness: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgmpAction {
    SendReport { group: Ipv4Address, version: IgmpVersion },
    SendLeave { group: Ipv4Address },
}

impl IgmpState {
    pub fn new(version: IgmpVersion) -> Self {
        IgmpState {
            groups: Vec::new(),
            version,
            unsolicited_report_interval: crate::Duration::from_millis(10_000),
            robustness: 2,
        }
    }

    pub fn join(&mut self, group: Ipv4Address, now: Instant) -> Option<IgmpAction> {
        if let Some(g) = self.groups.iter_mut().find(|g| g.group == group) {
            g.ref_count += 1;
            return None;
        }
        self.groups.push(GroupMembership {
            group,
            ref_count: 1,
            pending_reports: self.robustness,
            next_report: now,
        });
        Some(IgmpAction::SendReport { group, version: self.version })
    }

    pub fn leave(&mut self, group: Ipv4Address) -> Option<IgmpAction> {
        if let Some(idx) = self.groups.iter().position(|g| g.group == group) {
            self.groups[idx].ref_count -= 1;
            if self.groups[idx].ref_count == 0 {
                self.groups.remove(idx);
                return Some(IgmpAction::SendLeave { group });
            }
        }
        None
    }

    pub fn tick(&mut self, now: Instant) -> Vec<IgmpAction> {
        let mut actions = Vec::new();
        for g in &mut self.groups {
            if g.pending_reports > 0 && now >= g.next_report {
                g.pending_reports -= 1;
                g.next_report = now + self.unsolicited_report_interval;
                actions.push(IgmpAction::SendReport { group: g.group, version: self.version });
            }
        }
        actions
    }

    pub fn is_member(&self, group: Ipv4Address) -> bool {
        self.groups.iter().any(|g| g.group == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_leave_round_trip() {
        let mut igmp = IgmpState::new(IgmpVersion::V3);
        let group = Ipv4Address([224, 0, 0, 251]);
        assert!(igmp.join(group, Instant::ZERO).is_some());
        assert!(igmp.is_member(group));
        assert!(igmp.leave(group).is_some());
        assert!(!igmp.is_member(group));
    }
}
