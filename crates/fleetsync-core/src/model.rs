//! Domain model for the router fleet mirror
//!
//! Mirror-side entities (`Router`, `IpPool`, `IpAddress`, `PppoeProfile`,
//! `PppoeUser`), the device-side listing types produced by a
//! [`DeviceClient`](crate::traits::DeviceClient), and the structured result
//! types every engine operation returns.
//!
//! The join key between the two worlds is always the **external id**: the
//! identifier the router assigned to a pool/profile/user. External ids are
//! immutable; names and parameters drift and are overwritten from device
//! truth. Locally-set fields (billing/package links, comments) are never
//! written by the engine and survive updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw id string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type!(
    /// Mirror-side router id
    RouterId
);
id_type!(
    /// Mirror-side IP pool row id
    PoolId
);
id_type!(
    /// Mirror-side IP address row id
    AddressId
);
id_type!(
    /// Mirror-side PPPoE profile row id
    ProfileId
);
id_type!(
    /// Mirror-side PPPoE user row id
    UserId
);
id_type!(
    /// Billing-side subscriber id (opaque to the engine)
    SubscriberId
);
id_type!(
    /// Billing-side package id (opaque to the engine)
    PackageId
);

/// The four reconciled entity classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Pools,
    Addresses,
    Profiles,
    Users,
}

impl EntityClass {
    /// All classes, in canonical pass order
    ///
    /// Addresses follow pools so a freshly-created pool row is visible to
    /// the address pass of the same run.
    pub const ALL: [EntityClass; 4] = [
        EntityClass::Pools,
        EntityClass::Addresses,
        EntityClass::Profiles,
        EntityClass::Users,
    ];

    /// Stable lowercase name, used in logs and the cursor document
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Pools => "pools",
            EntityClass::Addresses => "addresses",
            EntityClass::Profiles => "profiles",
            EntityClass::Users => "users",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed access router. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: RouterId,
    /// Display name, used in logs only
    pub name: String,
    /// Opaque connection reference; only the device adapter interprets it
    pub connection: String,
    /// Inactive routers are skipped by fleet passes
    pub active: bool,
}

/// Service class a pool is provisioned for
///
/// Derived from the device-side pool name by convention; suspended and
/// cut-service pools hold subscribers whose service is degraded or cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Active,
    Suspended,
    CutService,
}

impl PoolKind {
    /// Infer the pool kind from the device-side pool name.
    ///
    /// Anything that doesn't advertise itself as suspended or cut is an
    /// active service pool.
    pub fn infer(device_name: &str) -> Self {
        let name = device_name.to_ascii_lowercase();
        if name.contains("cut") {
            PoolKind::CutService
        } else if name.contains("susp") {
            PoolKind::Suspended
        } else {
            PoolKind::Active
        }
    }
}

/// Mirror row for a device IP pool. Unique on (router_id, external_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPool {
    pub id: PoolId,
    pub router_id: RouterId,
    /// Immutable device-assigned id; the join key
    pub external_id: String,
    pub name: String,
    /// Raw range expression as the device reports it (validated on sync)
    pub ranges: String,
    pub kind: PoolKind,
    /// Locally-set; never written by the engine
    pub comment: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Assignment state of one mirrored address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStatus {
    Available,
    Assigned,
    /// No longer part of the pool's reported range (e.g. pool resized);
    /// held for human review, never deleted by the engine
    Blocked,
}

/// Mirror row for one address of a pool. Unique on (pool_id, address).
///
/// Ownership is a pair: the billing subscriber and the PPPoE user that
/// holds the address. The two links are set and cleared together; an
/// assigned row whose user link has gone dangling is an **orphan** and is
/// reclaimed by the orphan sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub id: AddressId,
    pub pool_id: PoolId,
    pub address: IpAddr,
    pub status: AddressStatus,
    subscriber_id: Option<SubscriberId>,
    pppoe_user_id: Option<UserId>,
}

impl IpAddress {
    /// New unowned row in the given state
    pub fn new(id: AddressId, pool_id: PoolId, address: IpAddr, status: AddressStatus) -> Self {
        Self {
            id,
            pool_id,
            address,
            status,
            subscriber_id: None,
            pppoe_user_id: None,
        }
    }

    /// Current owner pair, if any
    pub fn owner(&self) -> Option<(&SubscriberId, &UserId)> {
        match (&self.subscriber_id, &self.pppoe_user_id) {
            (Some(s), Some(u)) => Some((s, u)),
            _ => None,
        }
    }

    /// The owning PPPoE user link, if set
    pub fn pppoe_user_id(&self) -> Option<&UserId> {
        self.pppoe_user_id.as_ref()
    }

    /// Assign the address to a subscriber/user pair and mark it assigned
    pub fn assign(&mut self, subscriber: SubscriberId, user: UserId) {
        self.subscriber_id = Some(subscriber);
        self.pppoe_user_id = Some(user);
        self.status = AddressStatus::Assigned;
    }

    /// Clear both owner links without touching the status.
    ///
    /// Leaves the row dangling-assigned when it was assigned; the orphan
    /// sweep converges it back to available.
    pub fn sever_owner(&mut self) {
        self.subscriber_id = None;
        self.pppoe_user_id = None;
    }

    /// Clear owner links and return the row to the available state
    pub fn release(&mut self) {
        self.sever_owner();
        self.status = AddressStatus::Available;
    }

    /// True when the row is assigned but its user link has gone dangling
    pub fn is_orphaned(&self) -> bool {
        self.status == AddressStatus::Assigned && self.pppoe_user_id.is_none()
    }
}

/// Mirror row for a PPPoE service profile. Unique on (router_id, external_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppoeProfile {
    pub id: ProfileId,
    pub router_id: RouterId,
    /// Immutable device-assigned id; the join key
    pub external_id: String,
    pub name: String,
    /// Rate limit expression as the device reports it, e.g. "10M/2M"
    pub rate_limit: String,
    /// Optional burst parameters, e.g. "20M/4M"
    pub burst: Option<String>,
    /// Locally-set billing package link; never written by the engine
    pub package_id: Option<PackageId>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Service state of a PPPoE account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Disabled,
}

/// Mirror row for a PPPoE subscriber account. Unique on (router_id, external_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppoeUser {
    pub id: UserId,
    pub router_id: RouterId,
    /// Immutable device-assigned id; the join key
    pub external_id: String,
    pub username: String,
    /// External id of the linked service profile
    pub profile_external_id: String,
    pub status: UserStatus,
    /// Static address assigned device-side, if any
    pub static_address: Option<IpAddr>,
    /// Locally-set billing subscriber link; never written by the engine
    pub subscriber_id: Option<SubscriberId>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Device-side listings
// ---------------------------------------------------------------------------

/// One IP pool as the device reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePool {
    pub external_id: String,
    pub name: String,
    pub ranges: String,
}

/// One PPPoE profile as the device reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub external_id: String,
    pub name: String,
    pub rate_limit: String,
    pub burst: Option<String>,
}

/// One PPPoE account as the device reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUser {
    pub external_id: String,
    pub username: String,
    pub profile: String,
    pub disabled: bool,
    pub static_address: Option<IpAddr>,
}

/// Address occupancy of one pool as the device reports it.
///
/// The device knows only two buckets; the mirror derives the third
/// (blocked) from rows that appear in neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddressBook {
    pub used: Vec<IpAddr>,
    pub available: Vec<IpAddr>,
}

/// A contiguous address range, parsed from a device range expression
///
/// Accepts `first-last`, CIDR `base/prefix`, and single-address forms.
/// Range expressions may list several ranges separated by commas; see
/// [`parse_ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub first: IpAddr,
    pub last: IpAddr,
}

impl FromStr for AddressRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((first, last)) = s.split_once('-') {
            let first: IpAddr = first
                .trim()
                .parse()
                .map_err(|_| format!("bad range start {first:?}"))?;
            let last: IpAddr = last
                .trim()
                .parse()
                .map_err(|_| format!("bad range end {last:?}"))?;
            if first.is_ipv4() != last.is_ipv4() {
                return Err(format!("mixed address families in range {s:?}"));
            }
            Ok(Self { first, last })
        } else if let Some((base, prefix)) = s.split_once('/') {
            let base: IpAddr = base
                .trim()
                .parse()
                .map_err(|_| format!("bad network base {base:?}"))?;
            let prefix: u8 = prefix
                .trim()
                .parse()
                .map_err(|_| format!("bad prefix length {prefix:?}"))?;
            let max = if base.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(format!("prefix /{prefix} out of range for {base}"));
            }
            Ok(Self {
                first: base,
                last: base,
            })
        } else {
            let addr: IpAddr = s.parse().map_err(|_| format!("bad address {s:?}"))?;
            Ok(Self {
                first: addr,
                last: addr,
            })
        }
    }
}

/// Parse a device range expression (comma-separated ranges).
///
/// Used as the validation gate for device pools: a pool whose expression
/// does not parse is a malformed record and is skipped for the pass.
pub fn parse_ranges(expr: &str) -> std::result::Result<Vec<AddressRange>, String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err("empty range expression".to_string());
    }
    expr.split(',').map(AddressRange::from_str).collect()
}

// ---------------------------------------------------------------------------
// Results and run reporting
// ---------------------------------------------------------------------------

/// Failure scope of an `Error` sync outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transport,
    Validation,
    Persistence,
}

impl From<&crate::Error> for ErrorClass {
    fn from(err: &crate::Error) -> Self {
        match err {
            crate::Error::Transport { .. } => ErrorClass::Transport,
            crate::Error::Validation(_) => ErrorClass::Validation,
            _ => ErrorClass::Persistence,
        }
    }
}

/// Per-record outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Row created from a device record (auto-create policy permitting)
    Created,
    /// Engine-owned fields drifted and were overwritten from device truth
    Updated,
    /// No drift; freshness timestamp advanced only
    Verified,
    /// Device record with no mirror row; notify-only unless auto-create
    MissingInDb,
    /// Mirror row the device no longer reports; flagged, never deleted
    MissingInRouter,
    /// Record- or router-scoped failure; the pass continued
    Error(ErrorClass),
}

/// Structured result for one record of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub class: EntityClass,
    pub router_id: RouterId,
    /// Device-assigned id of the affected record; absent for router-scoped
    /// failures
    pub external_id: Option<String>,
    pub outcome: SyncOutcome,
    /// Names of the engine-owned fields that were overwritten (Updated only)
    pub changed_fields: Vec<String>,
    pub message: Option<String>,
}

impl SyncResult {
    pub fn created(class: EntityClass, router: &RouterId, external_id: &str) -> Self {
        Self::outcome(class, router, Some(external_id), SyncOutcome::Created)
    }

    pub fn updated(
        class: EntityClass,
        router: &RouterId,
        external_id: &str,
        changed_fields: Vec<String>,
    ) -> Self {
        Self {
            changed_fields,
            ..Self::outcome(class, router, Some(external_id), SyncOutcome::Updated)
        }
    }

    pub fn verified(class: EntityClass, router: &RouterId, external_id: &str) -> Self {
        Self::outcome(class, router, Some(external_id), SyncOutcome::Verified)
    }

    pub fn missing_in_db(class: EntityClass, router: &RouterId, external_id: &str) -> Self {
        Self::outcome(class, router, Some(external_id), SyncOutcome::MissingInDb)
    }

    pub fn missing_in_router(class: EntityClass, router: &RouterId, external_id: &str) -> Self {
        Self::outcome(class, router, Some(external_id), SyncOutcome::MissingInRouter)
    }

    /// Record- or router-scoped failure (`external_id` absent for the latter)
    pub fn error(
        class: EntityClass,
        router: &RouterId,
        external_id: Option<&str>,
        err: &crate::Error,
    ) -> Self {
        Self {
            message: Some(err.to_string()),
            ..Self::outcome(class, router, external_id, SyncOutcome::Error((&*err).into()))
        }
    }

    /// Attach a free-form message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn outcome(
        class: EntityClass,
        router: &RouterId,
        external_id: Option<&str>,
        outcome: SyncOutcome,
    ) -> Self {
        Self {
            class,
            router_id: router.clone(),
            external_id: external_id.map(str::to_string),
            outcome,
            changed_fields: Vec::new(),
            message: None,
        }
    }

    /// True for `Error` outcomes whose class is persistence
    pub fn is_persistence_error(&self) -> bool {
        self.outcome == SyncOutcome::Error(ErrorClass::Persistence)
    }
}

/// Per-pool counters from one address reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPoolReport {
    pub pool_external_id: String,
    pub created: usize,
    pub updated: usize,
    pub freed: usize,
    pub blocked: usize,
    pub verified: usize,
    /// Per-record store failures the pass skipped over
    pub errors: usize,
}

impl AddressPoolReport {
    pub fn new(pool_external_id: impl Into<String>) -> Self {
        Self {
            pool_external_id: pool_external_id.into(),
            ..Self::default()
        }
    }

    /// True when the pass changed at least one row
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.freed + self.blocked > 0
    }
}

impl fmt::Display for AddressPoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} freed={} blocked={} verified={} errors={}",
            self.created, self.updated, self.freed, self.blocked, self.verified, self.errors
        )
    }
}

/// Result of one orphan reclaim sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Number of dangling-assigned addresses returned to available
    pub freed: usize,
}

/// Outcome of one class pass across the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRunReport {
    pub class: EntityClass,
    pub results: Vec<SyncResult>,
    pub routers_total: usize,
    pub routers_failed: usize,
    /// False when the pass hit a store-level failure or was cancelled
    pub cursor_advanced: bool,
    /// Store-level failure that withheld the cursor, if any
    pub error: Option<String>,
}

impl ClassRunReport {
    pub fn new(class: EntityClass) -> Self {
        Self {
            class,
            results: Vec::new(),
            routers_total: 0,
            routers_failed: 0,
            cursor_advanced: false,
            error: None,
        }
    }

    /// Count results with the given outcome
    pub fn count(&self, outcome: &SyncOutcome) -> usize {
        self.results.iter().filter(|r| &r.outcome == outcome).count()
    }

    /// True if any per-record result carries a persistence failure
    pub fn has_persistence_error(&self) -> bool {
        self.results.iter().any(SyncResult::is_persistence_error)
    }
}

/// Aggregated outcome of one fleet-wide reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Classes that ran this invocation
    pub classes: Vec<ClassRunReport>,
    /// Classes skipped because their interval had not elapsed
    pub skipped: Vec<EntityClass>,
    /// Present when the orphan sweep ran as the follow-up to a user pass
    pub reclaim: Option<ReclaimReport>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            classes: Vec::new(),
            skipped: Vec::new(),
            reclaim: None,
        }
    }

    /// Report for one class, if it ran
    pub fn class(&self, class: EntityClass) -> Option<&ClassRunReport> {
        self.classes.iter().find(|c| c.class == class)
    }

    /// Total number of per-record results across all classes
    pub fn total_results(&self) -> usize {
        self.classes.iter().map(|c| c.results.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

/// Last successful fleet-pass completion time per entity class.
///
/// Read at run start, written only when a class pass completes without a
/// store-level failure. A class with no cursor has never completed a pass
/// and is always due.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursors {
    #[serde(default)]
    cursors: HashMap<EntityClass, DateTime<Utc>>,
}

impl SyncCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successful completion of the given class, if any
    pub fn get(&self, class: EntityClass) -> Option<DateTime<Utc>> {
        self.cursors.get(&class).copied()
    }

    /// Advance the cursor for the given class
    pub fn set(&mut self, class: EntityClass, at: DateTime<Utc>) {
        self.cursors.insert(class, at);
    }
}
