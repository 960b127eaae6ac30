//! Collision event routing
//!
//! The physics backend reports raw contacts several times per step. The
//! router keeps one record per body pair and only gathers what some
//! registered handler could need. Once per step it classifies each pair
//! (begin, end, continue), keeps the events whose condition matched and
//! derives exactly the quantities those events asked for.
//!
//! Event names look like `collision:<condition>[:<argument>]*`, e.g.
//! `collision:begin:average-world-point:world-normal`.
//!
//! Pair records live in pools and are released at the end of every step.

use std::collections::BTreeMap;
use std::ops::BitOr;

use glam::DVec2;

use crate::error::{ArenaError, Result};
use crate::pool::{Handle, Pool, Recycle};

/// Physics body identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u32);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collision category bits of an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Category(u8);

impl Category {
    pub const NONE: Category = Category(0);
    pub const VEHICLE: Category = Category(1 << 0);
    pub const SCRAP: Category = Category(1 << 1);
    pub const ARENA: Category = Category(1 << 2);

    pub fn intersects(self, other: Category) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Category {
    type Output = Category;
    fn bitor(self, rhs: Category) -> Category {
        Category(self.0 | rhs.0)
    }
}

/// When an event fires relative to the pair's contact this step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConditionMask(u8);

impl ConditionMask {
    pub const NONE: ConditionMask = ConditionMask(0);
    pub const BEGIN: ConditionMask = ConditionMask(1 << 0);
    pub const END: ConditionMask = ConditionMask(1 << 1);
    /// Touching for the whole step (neither began nor ended)
    pub const CONTINUE: ConditionMask = ConditionMask(1 << 2);
    pub const ANY: ConditionMask = ConditionMask(0b111);

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "begin" => Some(Self::BEGIN),
            "end" => Some(Self::END),
            "continue" => Some(Self::CONTINUE),
            "any" => Some(Self::ANY),
            _ => None,
        }
    }

    /// Classify a pair from what happened to it this step. A pair that
    /// begins and ends in the same step counts as both, never as continue.
    pub fn for_step(begin: bool, end: bool) -> Self {
        let mut mask = Self::NONE;
        if begin {
            mask = mask | Self::BEGIN;
        }
        if end {
            mask = mask | Self::END;
        }
        if !begin && !end {
            mask = mask | Self::CONTINUE;
        }
        mask
    }

    pub fn intersects(self, other: ConditionMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ConditionMask {
    type Output = ConditionMask;
    fn bitor(self, rhs: ConditionMask) -> ConditionMask {
        ConditionMask(self.0 | rhs.0)
    }
}

/// Derived contact quantities a handler asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgumentMask(u16);

impl ArgumentMask {
    pub const NONE: ArgumentMask = ArgumentMask(0);
    pub const POINTS_WORLD: ArgumentMask = ArgumentMask(1 << 0);
    pub const POINT_AVERAGE_WORLD: ArgumentMask = ArgumentMask(1 << 1);
    pub const NORMAL_WORLD_A: ArgumentMask = ArgumentMask(1 << 2);
    pub const NORMAL_WORLD_B: ArgumentMask = ArgumentMask(1 << 3);
    pub const IMPULSES_NORMAL: ArgumentMask = ArgumentMask(1 << 4);
    pub const IMPULSE_NORMAL_AVERAGE: ArgumentMask = ArgumentMask(1 << 5);
    pub const IMPULSES_TANGENT: ArgumentMask = ArgumentMask(1 << 6);
    pub const IMPULSE_TANGENT_AVERAGE: ArgumentMask = ArgumentMask(1 << 7);

    /// Anything that needs the world manifold
    pub const WORLD_ANY: ArgumentMask = ArgumentMask(
        Self::POINTS_WORLD.0 | Self::POINT_AVERAGE_WORLD.0 | Self::NORMAL_WORLD_A.0 | Self::NORMAL_WORLD_B.0,
    );
    pub const NORMAL_IMPULSE_ANY: ArgumentMask =
        ArgumentMask(Self::IMPULSES_NORMAL.0 | Self::IMPULSE_NORMAL_AVERAGE.0);
    pub const TANGENT_IMPULSE_ANY: ArgumentMask =
        ArgumentMask(Self::IMPULSES_TANGENT.0 | Self::IMPULSE_TANGENT_AVERAGE.0);

    /// Argument flag for one name segment, from the point of view of
    /// body A (`for_a`) or body B
    pub fn from_name(name: &str, for_a: bool) -> Option<Self> {
        let mask = match name {
            "world-points" => Self::POINTS_WORLD,
            "average-world-point" => Self::POINT_AVERAGE_WORLD,
            "world-normal" if for_a => Self::NORMAL_WORLD_A,
            "world-normal" => Self::NORMAL_WORLD_B,
            "normal-impulses" => Self::IMPULSES_NORMAL,
            "average-normal-impulse" => Self::IMPULSE_NORMAL_AVERAGE,
            "tangent-impulses" => Self::IMPULSES_TANGENT,
            "average-tangent-impulse" => Self::IMPULSE_TANGENT_AVERAGE,
            _ => return None,
        };
        Some(mask)
    }

    pub fn intersects(self, other: ArgumentMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ArgumentMask {
    type Output = ArgumentMask;
    fn bitor(self, rhs: ArgumentMask) -> ArgumentMask {
        ArgumentMask(self.0 | rhs.0)
    }
}

/// A parsed subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionEvent {
    pub name: String,
    pub condition: ConditionMask,
    pub args_a: ArgumentMask,
    pub args_b: ArgumentMask,
}

impl CollisionEvent {
    /// `Ok(None)` for names that are not collision events (wrong prefix or
    /// unknown condition); an unknown argument is an error
    pub fn parse(name: &str) -> Result<Option<Self>> {
        let mut parts = name.split(':');
        if parts.next() != Some("collision") {
            return Ok(None);
        }
        let Some(condition) = parts.next().and_then(ConditionMask::from_name) else {
            return Ok(None);
        };

        let (mut args_a, mut args_b) = (ArgumentMask::NONE, ArgumentMask::NONE);
        for part in parts {
            match (
                ArgumentMask::from_name(part, true),
                ArgumentMask::from_name(part, false),
            ) {
                (Some(a), Some(b)) => {
                    args_a = args_a | a;
                    args_b = args_b | b;
                }
                _ => return Err(ArenaError::UnknownCollisionArgument(part.to_string())),
            }
        }

        Ok(Some(Self {
            name: name.to_string(),
            condition,
            args_a,
            args_b,
        }))
    }

    fn args(&self, for_a: bool) -> ArgumentMask {
        if for_a { self.args_a } else { self.args_b }
    }
}

/// Contact points and normal in world space, as the backend orders them
/// (normal points from the backend's first body to its second)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorldManifold {
    pub points: [DVec2; 2],
    pub normal: DVec2,
}

/// Solver impulses per contact point
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactImpulse {
    pub normal: [f64; 2],
    pub tangent: [f64; 2],
}

/// A contact as reported by the physics backend
pub trait RawContact {
    /// Number of manifold points (at most 2)
    fn point_count(&self) -> usize;
    /// May be costly; only called when some handler needs world data
    fn world_manifold(&self) -> WorldManifold;
}

/// How often each derived quantity has been produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeStats {
    pub manifolds: usize,
    pub world_points: usize,
    pub average_world_points: usize,
    pub world_normals: usize,
    pub normal_impulses: usize,
    pub average_normal_impulses: usize,
    pub tangent_impulses: usize,
    pub average_tangent_impulses: usize,
}

/// Raw data gathered for one contact, plus what has been derived from it
#[derive(Debug, Clone, Default)]
struct ContactInfo {
    point_count: usize,
    /// Backend's first body is the pair's B
    flipped: bool,
    manifold: WorldManifold,
    world_points: [DVec2; 2],
    average_world_point: DVec2,
    world_normal_a: DVec2,
    world_normal_b: DVec2,
    normal_impulses: [f64; 2],
    average_normal_impulse: f64,
    tangent_impulses: [f64; 2],
    average_tangent_impulse: f64,
}

impl Recycle for ContactInfo {
    fn recycle(&mut self) {
        *self = Self::default();
    }
}

fn average(count: usize, values: &[f64; 2]) -> f64 {
    if count >= 2 { (values[0] + values[1]) / 2.0 } else { values[0] }
}

impl ContactInfo {
    /// Collect only what `mask` could need
    fn gather(
        &mut self,
        contact: &dyn RawContact,
        impulse: &ContactImpulse,
        flipped: bool,
        mask: ArgumentMask,
        stats: &mut ComputeStats,
    ) {
        self.point_count = contact.point_count().min(2);
        self.flipped = flipped;

        if mask.intersects(ArgumentMask::WORLD_ANY) {
            self.manifold = contact.world_manifold();
            stats.manifolds += 1;
        }
        if mask.intersects(ArgumentMask::NORMAL_IMPULSE_ANY) {
            self.normal_impulses = impulse.normal;
            stats.normal_impulses += 1;
        }
        if mask.intersects(ArgumentMask::TANGENT_IMPULSE_ANY) {
            self.tangent_impulses = impulse.tangent;
            stats.tangent_impulses += 1;
        }
    }

    /// Derive the quantities in `mask` from gathered data
    fn compute_arguments(&mut self, mask: ArgumentMask, stats: &mut ComputeStats) {
        if mask.intersects(ArgumentMask::POINTS_WORLD) {
            self.world_points = self.manifold.points;
            stats.world_points += 1;
        }
        if mask.intersects(ArgumentMask::POINT_AVERAGE_WORLD) {
            let [p0, p1] = self.manifold.points;
            self.average_world_point = if self.point_count >= 2 { (p0 + p1) / 2.0 } else { p0 };
            stats.average_world_points += 1;
        }

        let flip = if self.flipped { -1.0 } else { 1.0 };
        if mask.intersects(ArgumentMask::NORMAL_WORLD_A | ArgumentMask::NORMAL_WORLD_B) {
            self.world_normal_a = self.manifold.normal * flip;
            self.world_normal_b = self.manifold.normal * -flip;
            stats.world_normals += 1;
        }

        if mask.intersects(ArgumentMask::IMPULSE_NORMAL_AVERAGE) {
            self.average_normal_impulse = average(self.point_count, &self.normal_impulses);
            stats.average_normal_impulses += 1;
        }
        if mask.intersects(ArgumentMask::IMPULSE_TANGENT_AVERAGE) {
            self.average_tangent_impulse = average(self.point_count, &self.tangent_impulses);
            stats.average_tangent_impulses += 1;
        }
    }
}

/// One body pair's activity this step
#[derive(Debug, Clone, Default)]
struct CollisionInfo {
    actor_a: Option<ActorId>,
    actor_b: Option<ActorId>,
    begin: bool,
    end: bool,
    gather_mask: ArgumentMask,
    contacts: Vec<Handle>,
}

impl Recycle for CollisionInfo {
    fn recycle(&mut self) {
        self.actor_a = None;
        self.actor_b = None;
        self.begin = false;
        self.end = false;
        self.gather_mask = ArgumentMask::NONE;
        self.contacts.clear();
    }
}

/// One contact seen from a handler's own body. Fields are only filled
/// when the handler's event asked for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactReport {
    pub point_count: usize,
    pub world_points: Option<[DVec2; 2]>,
    pub average_world_point: Option<DVec2>,
    /// Points away from the handler's body
    pub world_normal: Option<DVec2>,
    pub normal_impulses: Option<[f64; 2]>,
    pub average_normal_impulse: Option<f64>,
    pub tangent_impulses: Option<[f64; 2]>,
    pub average_tangent_impulse: Option<f64>,
}

impl ContactReport {
    fn from_info(info: &ContactInfo, for_a: bool, mask: ArgumentMask) -> Self {
        let has = |flag: ArgumentMask| mask.intersects(flag);
        let normal_flag = if for_a {
            ArgumentMask::NORMAL_WORLD_A
        } else {
            ArgumentMask::NORMAL_WORLD_B
        };
        Self {
            point_count: info.point_count,
            world_points: has(ArgumentMask::POINTS_WORLD).then_some(info.world_points),
            average_world_point: has(ArgumentMask::POINT_AVERAGE_WORLD)
                .then_some(info.average_world_point),
            world_normal: has(normal_flag).then_some(if for_a {
                info.world_normal_a
            } else {
                info.world_normal_b
            }),
            normal_impulses: has(ArgumentMask::IMPULSES_NORMAL).then_some(info.normal_impulses),
            average_normal_impulse: has(ArgumentMask::IMPULSE_NORMAL_AVERAGE)
                .then_some(info.average_normal_impulse),
            tangent_impulses: has(ArgumentMask::IMPULSES_TANGENT).then_some(info.tangent_impulses),
            average_tangent_impulse: has(ArgumentMask::IMPULSE_TANGENT_AVERAGE)
                .then_some(info.average_tangent_impulse),
        }
    }

    /// Points of this contact, if requested
    pub fn points(&self) -> Option<&[DVec2]> {
        self.world_points.as_ref().map(|p| &p[..self.point_count.min(2)])
    }
}

/// Everything one body learns about one collision this step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionReport {
    pub other: Option<ActorId>,
    pub other_category: Category,
    pub contacts: Vec<ContactReport>,
}

impl CollisionReport {
    fn clear(&mut self) {
        self.other = None;
        self.other_category = Category::NONE;
        self.contacts.clear();
    }
}

/// A matched event handed to the caller's dispatcher
#[derive(Debug)]
pub struct CollisionDispatch<'a> {
    pub actor: ActorId,
    pub event: &'a str,
    pub report: &'a CollisionReport,
}

#[derive(Debug, Default)]
struct ActorProxy {
    category: Category,
    events: Vec<CollisionEvent>,
}

impl ActorProxy {
    fn args(&self, for_a: bool) -> ArgumentMask {
        self.events
            .iter()
            .fold(ArgumentMask::NONE, |acc, e| acc | e.args(for_a))
    }
}

#[derive(Debug, Default)]
pub struct CollisionRouter {
    proxies: BTreeMap<ActorId, ActorProxy>,
    /// Canonical (low id, high id) pair -> record for this step
    pairs: BTreeMap<(ActorId, ActorId), Handle>,
    collisions: Pool<CollisionInfo>,
    contacts: Pool<ContactInfo>,
    stats: ComputeStats,

    // Scratch reused across steps
    handles: Vec<Handle>,
    matched_a: Vec<usize>,
    matched_b: Vec<usize>,
    report: CollisionReport,
}

impl CollisionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    // === Actors and subscriptions ===

    pub fn add_actor(&mut self, id: ActorId, category: Category) {
        self.proxies.entry(id).or_default().category = category;
    }

    /// Pairs involving a removed actor are dropped when events fire
    pub fn remove_actor(&mut self, id: ActorId) -> bool {
        self.proxies.remove(&id).is_some()
    }

    pub fn has_actor(&self, id: ActorId) -> bool {
        self.proxies.contains_key(&id)
    }

    pub fn category(&self, id: ActorId) -> Option<Category> {
        self.proxies.get(&id).map(|p| p.category)
    }

    /// Returns whether a new event was added. Duplicate names and names
    /// that are not collision events are ignored.
    pub fn register_collision_event(&mut self, id: ActorId, name: &str) -> Result<bool> {
        let proxy = self.proxies.get_mut(&id).ok_or(ArenaError::UnknownActor(id.0))?;
        if proxy.events.iter().any(|e| e.name == name) {
            return Ok(false);
        }
        match CollisionEvent::parse(name)? {
            Some(event) => {
                proxy.events.push(event);
                log::debug!("Actor {} listens for '{}'", id, name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn unregister_collision_event(&mut self, id: ActorId, name: &str) -> bool {
        let Some(proxy) = self.proxies.get_mut(&id) else {
            return false;
        };
        let before = proxy.events.len();
        proxy.events.retain(|e| e.name != name);
        proxy.events.len() != before
    }

    pub fn events(&self, id: ActorId) -> &[CollisionEvent] {
        self.proxies.get(&id).map_or(&[], |p| p.events.as_slice())
    }

    // === Backend callbacks ===

    /// Record for the pair, created on first sight if anyone cares
    fn collision_info(&mut self, id0: ActorId, id1: ActorId) -> Option<Handle> {
        let key = (id0.min(id1), id0.max(id1));
        if let Some(&handle) = self.pairs.get(&key) {
            return Some(handle);
        }

        let proxy_a = self.proxies.get(&key.0)?;
        let proxy_b = self.proxies.get(&key.1)?;
        if proxy_a.events.is_empty() && proxy_b.events.is_empty() {
            return None;
        }

        // Condition is not known yet, so gather for every event
        let mask = proxy_a.args(true) | proxy_b.args(false);

        let handle = self.collisions.allocate();
        let info = self.collisions.get_mut(handle)?;
        info.actor_a = Some(key.0);
        info.actor_b = Some(key.1);
        info.gather_mask = mask;
        self.pairs.insert(key, handle);
        Some(handle)
    }

    pub fn begin_contact(&mut self, id0: ActorId, id1: ActorId) {
        if let Some(info) = self
            .collision_info(id0, id1)
            .and_then(|h| self.collisions.get_mut(h))
        {
            info.begin = true;
        }
    }

    pub fn end_contact(&mut self, id0: ActorId, id1: ActorId) {
        if let Some(info) = self
            .collision_info(id0, id1)
            .and_then(|h| self.collisions.get_mut(h))
        {
            info.end = true;
        }
    }

    /// `id0` and `id1` in the backend's own order for this contact
    pub fn post_solve(
        &mut self,
        id0: ActorId,
        id1: ActorId,
        contact: &dyn RawContact,
        impulse: &ContactImpulse,
    ) {
        let Some(handle) = self.collision_info(id0, id1) else {
            return;
        };
        let Some(mask) = self.collisions.get(handle).map(|i| i.gather_mask) else {
            return;
        };
        if mask.is_empty() {
            return;
        }

        let contact_handle = self.contacts.allocate();
        if let Some(info) = self.contacts.get_mut(contact_handle) {
            info.gather(contact, impulse, id1 < id0, mask, &mut self.stats);
        }
        if let Some(info) = self.collisions.get_mut(handle) {
            info.contacts.push(contact_handle);
        }
    }

    // === Dispatch ===

    /// Fire every matched event, then release all per-step records
    pub fn fire_collision_events(
        &mut self,
        mut dispatch: impl FnMut(CollisionDispatch<'_>),
    ) -> Result<()> {
        let pairs: Vec<Handle> = self.pairs.values().copied().collect();
        for handle in pairs {
            self.fire_pair(handle, &mut dispatch)?;
        }
        self.end_step()
    }

    fn fire_pair(
        &mut self,
        handle: Handle,
        dispatch: &mut impl FnMut(CollisionDispatch<'_>),
    ) -> Result<()> {
        let Some(info) = self.collisions.get(handle) else {
            return Ok(());
        };
        let (Some(a), Some(b)) = (info.actor_a, info.actor_b) else {
            return Ok(());
        };
        let condition = ConditionMask::for_step(info.begin, info.end);
        self.handles.clear();
        self.handles.extend_from_slice(&info.contacts);

        // The dispatch list owns a reference to each contact until the
        // pair has been reported
        for &h in &self.handles {
            self.contacts.retain(h)?;
        }
        self.dispatch_pair(a, b, condition, dispatch);
        for &h in &self.handles {
            self.contacts.release(h)?;
        }
        Ok(())
    }

    fn dispatch_pair(
        &mut self,
        a: ActorId,
        b: ActorId,
        condition: ConditionMask,
        dispatch: &mut impl FnMut(CollisionDispatch<'_>),
    ) {
        // Either body may have been removed mid-step
        let (Some(proxy_a), Some(proxy_b)) = (self.proxies.get(&a), self.proxies.get(&b)) else {
            return;
        };

        filter_events(&proxy_a.events, condition, &mut self.matched_a);
        filter_events(&proxy_b.events, condition, &mut self.matched_b);
        if self.matched_a.is_empty() && self.matched_b.is_empty() {
            return;
        }

        let mask_a = matched_args(&proxy_a.events, &self.matched_a, true);
        let mask_b = matched_args(&proxy_b.events, &self.matched_b, false);
        for &h in &self.handles {
            if let Some(contact) = self.contacts.get_mut(h) {
                contact.compute_arguments(mask_a | mask_b, &mut self.stats);
            }
        }

        for (actor, other, proxy, other_proxy, matched, mask, for_a) in [
            (a, b, proxy_a, proxy_b, &self.matched_a, mask_a, true),
            (b, a, proxy_b, proxy_a, &self.matched_b, mask_b, false),
        ] {
            if matched.is_empty() {
                continue;
            }
            self.report.clear();
            self.report.other = Some(other);
            self.report.other_category = other_proxy.category;
            self.report.contacts.extend(
                self.handles
                    .iter()
                    .filter_map(|&h| self.contacts.get(h))
                    .map(|c| ContactReport::from_info(c, for_a, mask)),
            );
            for &index in matched {
                dispatch(CollisionDispatch {
                    actor,
                    event: &proxy.events[index].name,
                    report: &self.report,
                });
            }
        }
    }

    /// Return every pair and contact record to its pool
    fn end_step(&mut self) -> Result<()> {
        let pairs = std::mem::take(&mut self.pairs);
        for handle in pairs.into_values() {
            let contacts = self
                .collisions
                .get_mut(handle)
                .map(|info| std::mem::take(&mut info.contacts))
                .unwrap_or_default();
            for contact in contacts {
                self.contacts.release(contact)?;
            }
            self.collisions.release(handle)?;
        }
        log::trace!(
            "Step records released ({} contacts, {} pairs pooled)",
            self.contacts.free_count(),
            self.collisions.free_count()
        );
        Ok(())
    }

    // === Introspection ===

    pub fn stats(&self) -> &ComputeStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ComputeStats::default();
    }

    /// Pairs recorded so far this step
    pub fn pending_pairs(&self) -> usize {
        self.pairs.len()
    }

    /// Records in use across both pools
    pub fn live_records(&self) -> usize {
        self.collisions.live_count() + self.contacts.live_count()
    }
}

fn filter_events(events: &[CollisionEvent], condition: ConditionMask, out: &mut Vec<usize>) {
    out.clear();
    out.extend(
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.condition.intersects(condition))
            .map(|(i, _)| i),
    );
}

fn matched_args(events: &[CollisionEvent], matched: &[usize], for_a: bool) -> ArgumentMask {
    matched
        .iter()
        .fold(ArgumentMask::NONE, |acc, &i| acc | events[i].args(for_a))
}
