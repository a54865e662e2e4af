//! # Store 模块
//!
//! 显式共享状态：带订阅/通知接口的单值容器。
//!
//! 取代「把 setter 存进模块级可变变量」的写法：状态通过句柄显式传递，
//! 读取方可以轮询 `get`，也可以订阅变化。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

type Listener<T> = Rc<RefCell<Box<dyn FnMut(&T)>>>;

struct StoreInner<T> {
    value: RefCell<T>,
    listeners: RefCell<Vec<(u64, Listener<T>)>>,
    next_id: Cell<u64>,
}

/// 共享状态容器
pub struct Store<T: 'static> {
    inner: Rc<StoreInner<T>>,
}

impl<T: 'static> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("value", &self.inner.value.borrow())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

impl<T: 'static> Store<T> {
    /// 创建容器
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                value: RefCell::new(value),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// 以闭包读取当前值
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// 替换值并通知订阅者
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// 就地修改值并通知订阅者
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        match self.inner.value.try_borrow_mut() {
            Ok(mut value) => f(&mut value),
            Err(_) => {
                warn!("Store 正在通知订阅者，忽略重入写入");
                return;
            }
        }
        self.notify();
    }

    /// 订阅变化
    ///
    /// 回调内部对同一个容器的写入会被忽略，保留原值。
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> StoreSubscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(Box::new(listener)))));

        let weak: Weak<StoreInner<T>> = Rc::downgrade(&self.inner);
        StoreSubscription {
            unsubscribe: RefCell::new(Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
                }
            }))),
        }
    }

    /// 订阅者数量
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn notify(&self) {
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        let value = self.inner.value.borrow();
        for listener in listeners {
            if let Ok(mut listener) = listener.try_borrow_mut() {
                (listener)(&value);
            }
        }
    }
}

impl<T: Clone + 'static> Store<T> {
    /// 当前值的拷贝
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

/// 订阅句柄
///
/// 调用 `unsubscribe` 或丢弃句柄都会注销订阅。
pub struct StoreSubscription {
    unsubscribe: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl StoreSubscription {
    /// 注销订阅（幂等）
    pub fn unsubscribe(&self) {
        if let Some(unsubscribe) = self.unsubscribe.borrow_mut().take() {
            unsubscribe();
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("active", &self.unsubscribe.borrow().is_some())
            .finish()
    }
}
