//! # 调度性质集成测试
//!
//! 通过公共 API 验证帧调度的核心性质：每帧折叠、墙上时间补间、
//! 同步取消、一次性可见性门控和帧率统计。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use frame_sched::{
    Animator, Coalescer, CounterDriver, CounterOptions, Easing, EventHub, FrameClock, GateMode,
    GateOptions, HostEvent, IntersectionGate, ManualFrameHost, MonitorOptions, NoMemoryProbe,
    NullObserver, NumberFormat, ParallaxOptions, ParallaxWriter, PerformanceMonitor, Tween,
    VisibilityEntry,
};

fn call_counter() -> (Rc<Cell<u32>>, impl Fn()) {
    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    (count, move || count_clone.set(count_clone.get() + 1))
}

/// 一帧内的 N 次请求只派发一次，载荷为最后一次
#[test]
fn test_requests_within_frame_collapse() {
    let clock = FrameClock::manual();
    let received = Rc::new(RefCell::new(Vec::new()));
    let received_clone = received.clone();
    let coalescer = Coalescer::new(&clock, move |payload: usize, _tick| {
        received_clone.borrow_mut().push(payload);
    });

    for n in 1..=250 {
        coalescer.request(n);
    }
    assert_eq!(clock.subscriber_count(), 1);
    clock.tick(0.0);
    clock.tick(16.7);

    assert_eq!(*received.borrow(), vec![250]);
    let stats = coalescer.stats();
    assert_eq!(stats.requests, 250);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.superseded, 249);
}

/// 线性补间在 0、D/2、D 处的取值
#[test]
fn test_linear_tween_samples() {
    let clock = FrameClock::manual();
    let animator = Animator::new(&clock);
    let values = Rc::new(RefCell::new(Vec::new()));
    let values_clone = values.clone();
    let _handle = animator.animate(
        Tween::new(0.0, 100.0, 1000.0).with_easing(Easing::Linear),
        move |v| values_clone.borrow_mut().push(v),
    );

    // 首帧锚定在 t0 = 5000
    clock.tick(5000.0);
    clock.tick(5500.0);
    clock.tick(6000.0);
    clock.tick(6500.0);

    assert_eq!(*values.borrow(), vec![0.0, 50.0, 100.0]);
    assert!(!animator.has_active_tweens());
}

/// 非线性缓动在 D/2 处按曲线取值
#[test]
fn test_ease_out_cubic_halfway() {
    let clock = FrameClock::manual();
    let animator = Animator::new(&clock);
    let values = Rc::new(RefCell::new(Vec::new()));
    let values_clone = values.clone();
    let _handle = animator.animate(
        Tween::new(0.0, 100.0, 1000.0).with_easing(Easing::EaseOutCubic),
        move |v| values_clone.borrow_mut().push(v),
    );

    clock.tick(0.0);
    clock.tick(500.0);
    clock.tick(1000.0);

    // 1 - (1 - 0.5)^3 = 0.875
    assert_eq!(*values.borrow(), vec![0.0, 87.5, 100.0]);
}

/// 以固定帧间隔驱动 1000ms 补间，返回每帧 (时间戳, 值) 与完成时间
fn drive_tween(frames_per_second: u32) -> (Vec<(f64, f64)>, Option<f64>) {
    let clock = FrameClock::manual();
    let animator = Animator::new(&clock);
    let now = Rc::new(Cell::new(0.0));
    let samples = Rc::new(RefCell::new(Vec::new()));
    let completed_at = Rc::new(Cell::new(None));

    let _handle = {
        let now_update = now.clone();
        let now_complete = now.clone();
        let samples = samples.clone();
        let completed_at = completed_at.clone();
        animator.animate_with_completion(
            Tween::new(0.0, 1000.0, 1000.0).with_easing(Easing::EaseInOutQuad),
            move |v| samples.borrow_mut().push((now_update.get(), v)),
            move || completed_at.set(Some(now_complete.get())),
        )
    };

    let rate = f64::from(frames_per_second);
    for k in 0..=frames_per_second * 2 {
        let t = f64::from(k) * 1000.0 / rate;
        now.set(t);
        clock.tick(t);
    }

    let samples = samples.borrow().clone();
    (samples, completed_at.get())
}

/// 30fps 与 144fps 在同一墙上时间完成，且共同时刻的取值相同
#[test]
fn test_tween_is_frame_rate_independent() {
    let (slow, slow_done) = drive_tween(30);
    let (fast, fast_done) = drive_tween(144);

    let slow_done = slow_done.unwrap();
    let fast_done = fast_done.unwrap();
    assert!((slow_done - 1000.0).abs() <= 1000.0 / 30.0);
    assert!((fast_done - 1000.0).abs() <= 1000.0 / 144.0);
    assert_eq!(slow.last().map(|s| s.1), Some(1000.0));
    assert_eq!(fast.last().map(|s| s.1), Some(1000.0));
    assert!(fast.len() > slow.len());

    // 每 1000/6 ms 两者各有一帧
    let mut shared = 0;
    for (t, value) in &slow {
        if let Some((_, other)) = fast.iter().find(|(ft, _)| ft == t) {
            assert_eq!(value, other, "value mismatch at {t}");
            shared += 1;
        }
    }
    assert_eq!(shared, 7);
}

/// 下一帧之前取消，回调一次都不会被调用
#[test]
fn test_cancel_before_tick_suppresses_callbacks() {
    let clock = FrameClock::manual();
    let (calls, bump) = call_counter();

    let token = clock.on_tick(move |_| bump());
    let (coalesced, bump_coalesced) = call_counter();
    let coalescer = Coalescer::new(&clock, move |_: (), _| bump_coalesced());
    coalescer.request(());

    token.cancel();
    coalescer.cancel();
    for k in 0..5 {
        clock.tick(f64::from(k) * 16.0);
    }

    assert_eq!(calls.get(), 0);
    assert_eq!(coalesced.get(), 0);
    assert_eq!(clock.subscriber_count(), 0);
}

/// Once 模式在反复进出视口时只触发一次
#[test]
fn test_once_gate_fires_exactly_once() {
    let clock = FrameClock::manual();
    let gate = IntersectionGate::new(&clock, Rc::new(NullObserver));
    let fired = Rc::new(RefCell::new(Vec::new()));
    let fired_clone = fired.clone();
    let handle = gate
        .watch("pricing", GateOptions::default().with_mode(GateMode::Once), move |v| {
            fired_clone.borrow_mut().push(v)
        })
        .unwrap();

    let mut t = 0.0;
    for intersecting in [false, true, false, true, true, false, true] {
        gate.report(&VisibilityEntry {
            target: "pricing".into(),
            is_intersecting: intersecting,
            intersection_ratio: if intersecting { 1.0 } else { 0.0 },
        });
        clock.tick(t);
        t += 16.0;
    }

    assert_eq!(*fired.borrow(), vec![true]);
    assert!(handle.has_fired());
    assert!(!gate.is_observing(handle.element()));
}

/// 每秒 60 次 tick 报告 60fps
#[test]
fn test_monitor_reports_sixty_fps() {
    let clock = FrameClock::manual();
    let monitor =
        PerformanceMonitor::new(&clock, Rc::new(NoMemoryProbe), MonitorOptions::default()).unwrap();
    monitor.start();

    for k in 0..60 {
        clock.tick(f64::from(k) * 1000.0 / 59.0);
    }

    let reading = monitor.latest().unwrap().reading;
    assert_eq!(reading.fps, 60);
    assert!((reading.frame_time_ms - 16.67).abs() < 0.01);
}

/// 三个视差层、500 次滚动事件：恰好三次写出，值为最终位置
#[test]
fn test_parallax_layers_write_once_each() {
    let clock = FrameClock::manual();
    let hub = EventHub::new();
    let writes = Rc::new(RefCell::new(Vec::new()));

    let layers: Vec<ParallaxWriter> = [0.2, 0.5, 0.8]
        .into_iter()
        .enumerate()
        .map(|(index, speed)| {
            let writes = writes.clone();
            ParallaxWriter::new(
                &clock,
                &hub,
                ParallaxOptions {
                    speed,
                    ..ParallaxOptions::default()
                },
                move |offset| writes.borrow_mut().push((index, offset)),
            )
            .unwrap()
        })
        .collect();

    for y in 1..=500 {
        hub.dispatch(&HostEvent::Scroll {
            x: 0.0,
            y: f64::from(y) * 2.0,
        });
    }
    clock.tick(0.0);

    let writes = writes.borrow();
    assert_eq!(writes.len(), 3);
    for (index, offset) in writes.iter() {
        assert!((offset - 1000.0 * layers[*index].options().speed).abs() < 1e-9);
    }
}

/// 计数器 0 → 1000、2000ms、easeOutQuart，抖动帧率下精确收尾
#[test]
fn test_counter_lands_on_exact_value() {
    let clock = FrameClock::manual();
    let last_text = Rc::new(RefCell::new(String::new()));
    let last_text_clone = last_text.clone();
    let counter = CounterDriver::new(
        &clock,
        CounterOptions {
            from: 0.0,
            to: 1000.0,
            duration_ms: 2000.0,
            easing: Easing::EaseOutQuart,
            format: NumberFormat::default(),
            ..CounterOptions::default()
        },
        move |_, text| *last_text_clone.borrow_mut() = text.to_string(),
    )
    .unwrap();
    let (completions, bump) = call_counter();
    counter.on_complete(bump);
    counter.start();

    // 13ms 到 41ms 之间的不规则帧间隔
    let mut t = 100.0;
    let mut frames = 0;
    while frames < 400 {
        clock.tick(t);
        t += 13.0 + f64::from(frames % 5) * 7.0;
        frames += 1;
    }

    assert_eq!(counter.value(), 1000.0);
    assert_eq!(*last_text.borrow(), "1,000");
    assert_eq!(completions.get(), 1);
}

/// 宿主只在有订阅者时被请求帧
#[test]
fn test_host_frame_requests_follow_subscribers() {
    let host = ManualFrameHost::new();
    let clock = FrameClock::new(host.clone());
    clock.start();
    assert!(!host.is_requested());

    let animator = Animator::new(&clock);
    let _handle = animator.animate(Tween::new(0.0, 1.0, 32.0), |_| {});
    assert!(host.take_request());

    let mut t = 0.0;
    while host.take_request() || animator.has_active_tweens() {
        clock.tick(t);
        t += 16.0;
        if t > 1000.0 {
            break;
        }
    }

    assert!(!animator.has_active_tweens());
    assert!(!host.is_requested());
}
