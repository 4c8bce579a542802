//! Transaction id correlation between requests sent to the switch and the
//! replies it sends back.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::openflow0x01::MsgCode;

/// How long a record for a message the switch only answers on failure (a
/// FLOW_MOD, PACKET_OUT, ...) is kept for an ERROR to come back.
pub const UNANSWERED_LIFETIME: Duration = Duration::from_secs(60);

/// A request waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XidEntry {
    /// Service that issued the request; `None` for requests the manager sends itself.
    pub service: Option<String>,
    /// The xid the issuing service chose, restored on the reply.
    pub original_xid: u32,
    pub kind: MsgCode,
    pub issued_at: Instant,
}

/// Outstanding requests keyed by the xid used on the secure channel.
#[derive(Debug)]
pub struct XidTable {
    entries: HashMap<u32, XidEntry>,
    /// Records without a regular reply, oldest first.
    unanswered: VecDeque<(Instant, u32)>,
    next_xid: u32,
}

impl Default for XidTable {
    fn default() -> Self {
        Self::new()
    }
}

impl XidTable {
    pub fn new() -> Self {
        XidTable {
            entries: HashMap::new(),
            unanswered: VecDeque::new(),
            next_xid: 1,
        }
    }

    /// Record a request. A second record for an xid still in flight is refused.
    ///
    /// Records of messages that never get a regular reply are dropped once
    /// they are older than `UNANSWERED_LIFETIME`; the check runs here, against
    /// the new record's issue time.
    pub fn insert(&mut self, xid: u32, entry: XidEntry) -> Result<()> {
        self.expire_unanswered(entry.issued_at);
        if self.entries.contains_key(&xid) {
            return Err(Error::DuplicateXid(xid));
        }
        if !entry.kind.expects_reply() {
            self.unanswered.push_back((entry.issued_at, xid));
        }
        self.entries.insert(xid, entry);
        Ok(())
    }

    fn expire_unanswered(&mut self, now: Instant) {
        while let Some(&(issued_at, xid)) = self.unanswered.front() {
            if now.saturating_duration_since(issued_at) <= UNANSWERED_LIFETIME {
                break;
            }
            self.unanswered.pop_front();
            let stale = self
                .entries
                .get(&xid)
                .is_some_and(|e| e.issued_at == issued_at && !e.kind.expects_reply());
            if stale {
                self.entries.remove(&xid);
                debug!(xid, "Unanswered xid record expired");
            }
        }
    }

    /// Consume the record for a reply's xid.
    pub fn lookup_and_remove(&mut self, xid: u32) -> Option<XidEntry> {
        self.entries.remove(&xid)
    }

    /// Peek at a record without consuming it, for replies that come in parts.
    pub fn lookup(&self, xid: u32) -> Option<&XidEntry> {
        self.entries.get(&xid)
    }

    pub fn contains(&self, xid: u32) -> bool {
        self.entries.contains_key(&xid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate an xid that is not currently in flight. Zero is never handed out.
    pub fn next_xid(&mut self) -> u32 {
        loop {
            let xid = self.next_xid;
            self.next_xid = self.next_xid.wrapping_add(1);
            if self.next_xid == 0 {
                self.next_xid = 1;
            }
            if !self.entries.contains_key(&xid) {
                return xid;
            }
        }
    }

    /// Entries ordered by xid.
    pub fn entries(&self) -> Vec<(u32, &XidEntry)> {
        let mut v: Vec<_> = self.entries.iter().map(|(xid, e)| (*xid, e)).collect();
        v.sort_by_key(|(xid, _)| *xid);
        v
    }

    /// Log every outstanding request.
    pub fn dump(&self) {
        info!(entries = self.entries.len(), "#### XID TABLE ####");
        for (xid, entry) in self.entries() {
            info!(
                xid = format_args!("{:#x}", xid),
                original_xid = format_args!("{:#x}", entry.original_xid),
                service = entry.service.as_deref().unwrap_or("-"),
                kind = %entry.kind,
                age_ms = entry.issued_at.elapsed().as_millis() as u64,
                "xid entry"
            );
        }
        info!("#### END ####");
    }
}
