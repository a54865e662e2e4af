//! # Events 模块
//!
//! 宿主输入事件的分发中心。
//!
//! 宿主把原生 `scroll` / `mousemove` / `resize` 事件交给 [`EventHub::dispatch`]，
//! 生产者适配器按事件类型挂接监听器，拆除时移除。
//! 分发是同步的；真正的工作由各适配器的 `Coalescer` 推迟到下一帧。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// 视口尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: f64,
    pub height: f64,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

/// 宿主输入事件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostEvent {
    /// 文档滚动偏移
    Scroll { x: f64, y: f64 },
    /// 指针位置（视口坐标）
    MouseMove { x: f64, y: f64 },
    /// 视口尺寸变化
    Resize { width: f64, height: f64 },
}

impl HostEvent {
    /// 事件类型
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::Scroll { .. } => EventKind::Scroll,
            HostEvent::MouseMove { .. } => EventKind::MouseMove,
            HostEvent::Resize { .. } => EventKind::Resize,
        }
    }
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Scroll,
    MouseMove,
    Resize,
}

/// 监听器 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EventListener = Rc<RefCell<Box<dyn FnMut(&HostEvent)>>>;

struct Listener {
    id: ListenerId,
    kind: EventKind,
    removed: Rc<Cell<bool>>,
    callback: EventListener,
}

#[derive(Default)]
struct HubInner {
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
    dispatched: Cell<u64>,
}

/// 事件分发中心
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Rc<HubInner>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

impl EventHub {
    /// 创建分发中心
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂接监听器
    pub fn listen(
        &self,
        kind: EventKind,
        callback: impl FnMut(&HostEvent) + 'static,
    ) -> EventListenerHandle {
        let id = ListenerId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let removed = Rc::new(Cell::new(false));
        self.inner.listeners.borrow_mut().push(Listener {
            id,
            kind,
            removed: removed.clone(),
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });

        EventListenerHandle {
            id,
            removed,
            hub: Rc::downgrade(&self.inner),
        }
    }

    /// 分发事件给同类型的监听器（挂接顺序）
    pub fn dispatch(&self, event: &HostEvent) {
        self.inner.dispatched.set(self.inner.dispatched.get() + 1);
        let kind = event.kind();
        let targets: Vec<(Rc<Cell<bool>>, EventListener)> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| (l.removed.clone(), l.callback.clone()))
            .collect();

        trace!(?kind, listeners = targets.len(), "分发宿主事件");
        for (removed, callback) in targets {
            if removed.get() {
                continue;
            }
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (callback)(event);
            }
        }
    }

    /// 监听器数量
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// 累计分发的事件数
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.get()
    }
}

/// 监听器句柄
pub struct EventListenerHandle {
    id: ListenerId,
    removed: Rc<Cell<bool>>,
    hub: Weak<HubInner>,
}

impl EventListenerHandle {
    /// 监听器 ID
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// 移除监听器（幂等）
    pub fn remove(&self) {
        if self.removed.replace(true) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.listeners.borrow_mut().retain(|l| l.id != self.id);
        }
    }

    /// 是否已移除
    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }
}

impl std::fmt::Debug for EventListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListenerHandle")
            .field("id", &self.id.0)
            .field("removed", &self.removed.get())
            .finish()
    }
}
