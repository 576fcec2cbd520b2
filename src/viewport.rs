//! In-process observation platform backed by a scrollable viewport.
//!
//! Targets are rectangles in page coordinates; the viewport is a window onto
//! the page that moves with [`ScrollViewport::scroll_to`]. Each observation gets
//! one report when it is created and one after every geometry change.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, trace};

use crate::events::Target;
use crate::geometry::{Rect, RootMargin, intersect};
use crate::watcher::{IntersectionStream, ObservationPlatform};

struct Observer {
    margin: RootMargin,
    tx: UnboundedSender<crate::events::Intersection>,
}

struct Region {
    rect: Rect,
    observers: Vec<Observer>,
}

struct Inner {
    viewport: Rect,
    next_id: u64,
    regions: BTreeMap<Target, Region>,
}

impl Inner {
    fn notify_all(&mut self) {
        let viewport = self.viewport;
        for (target, region) in self.regions.iter_mut() {
            let rect = region.rect;
            region.observers.retain(|obs| {
                let report = intersect(&rect, &viewport, &obs.margin);
                trace!(region = %target, ratio = report.ratio, "report");
                obs.tx.send(report).is_ok()
            });
        }
    }
}

pub struct ScrollViewport {
    inner: Mutex<Inner>,
}

impl ScrollViewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                viewport: Rect::new(0.0, 0.0, width, height),
                next_id: 1,
                regions: BTreeMap::new(),
            }),
        }
    }

    pub fn insert(&self, rect: Rect) -> Target {
        let mut inner = self.inner.lock();
        let target = Target(inner.next_id);
        inner.next_id += 1;
        inner.regions.insert(
            target,
            Region {
                rect,
                observers: Vec::new(),
            },
        );
        target
    }

    /// Remove a target. Its observations end without a visibility report.
    pub fn detach(&self, target: Target) {
        if self.inner.lock().regions.remove(&target).is_some() {
            debug!(region = %target, "detached");
        }
    }

    pub fn scroll_to(&self, y: f32) {
        let mut inner = self.inner.lock();
        inner.viewport.y = y.max(0.0);
        inner.notify_all();
    }

    pub fn scroll_by(&self, dy: f32) {
        let mut inner = self.inner.lock();
        inner.viewport.y = (inner.viewport.y + dy).max(0.0);
        inner.notify_all();
    }

    pub fn resize(&self, width: f32, height: f32) {
        let mut inner = self.inner.lock();
        inner.viewport.width = width.max(0.0);
        inner.viewport.height = height.max(0.0);
        inner.notify_all();
    }

    pub fn viewport(&self) -> Rect {
        self.inner.lock().viewport
    }

    /// Lowest page coordinate covered by any target.
    pub fn page_height(&self) -> f32 {
        self.inner
            .lock()
            .regions
            .values()
            .map(|r| r.rect.bottom())
            .fold(0.0, f32::max)
    }

    /// Live observations for `target`, counting only streams still held.
    pub fn observer_count(&self, target: Target) -> usize {
        self.inner
            .lock()
            .regions
            .get(&target)
            .map(|r| r.observers.iter().filter(|o| !o.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl ObservationPlatform for ScrollViewport {
    fn observe(&self, target: Target, margin: &RootMargin) -> IntersectionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let viewport = inner.viewport;
        // Unknown targets get a stream that is closed right away.
        if let Some(region) = inner.regions.get_mut(&target) {
            if tx.send(intersect(&region.rect, &viewport, margin)).is_ok() {
                region.observers.push(Observer {
                    margin: *margin,
                    tx,
                });
            }
        }
        rx
    }
}
