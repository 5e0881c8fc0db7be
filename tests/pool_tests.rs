use grackle::handler::{self, HandlerKind};
use grackle::{BaseHandler, Error, HttpHandler, PoolRegistry, WebHandler};
use std::time::Duration;

mod common;

#[derive(Default)]
struct CountedHandler {
    base: BaseHandler,
}

impl WebHandler for CountedHandler {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl HttpHandler for CountedHandler {}

const STACK: usize = 0x10000;

#[test]
fn checkout_beyond_capacity_blocks_then_succeeds() {
    common::setup();
    let mut registry = PoolRegistry::default();
    registry
        .register(&handler::http::<CountedHandler>(), 2, STACK)
        .unwrap();
    // Five checkouts against a capacity-2 pool: the producer refills
    // after every claim, so all of them succeed.
    for _ in 0..5 {
        let instance = registry.checkout("CountedHandler").unwrap();
        assert_eq!(instance.kind(), HandlerKind::Http);
    }
    assert_eq!(registry.pool("CountedHandler").unwrap().produced(), 5);
}

#[test]
fn registration_is_idempotent() {
    common::setup();
    let mut registry = PoolRegistry::default();
    registry
        .register(&handler::http::<CountedHandler>(), 1, STACK)
        .unwrap();
    registry
        .register(&handler::http::<CountedHandler>(), 1, STACK)
        .unwrap();
    assert!(registry.contains("CountedHandler"));
    registry.checkout("CountedHandler").unwrap();
}

#[test]
fn unknown_handler_name_fails_checkout() {
    common::setup();
    let registry = PoolRegistry::default();
    assert!(matches!(
        registry.checkout("NopeHandler").unwrap_err(),
        Error::UnknownHandler(_)
    ));
}

#[test]
fn soft_stop_drains_stock_then_closes() {
    common::setup();
    let mut registry = PoolRegistry::default();
    registry
        .register(&handler::http::<CountedHandler>(), 2, STACK)
        .unwrap();
    // Give the producer a moment to fill the stock.
    std::thread::sleep(Duration::from_millis(100));
    registry.soft_stop();

    let pool = registry.pool("CountedHandler").unwrap();
    assert!(pool.is_closed());
    let mut drained = 0;
    loop {
        match pool.checkout() {
            Ok(_) => drained += 1,
            Err(Error::PoolClosed) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert!(drained <= 2, "producer overfilled the pool");
    }
    // Closed for good: later checkouts keep failing.
    assert!(matches!(pool.checkout().unwrap_err(), Error::PoolClosed));
}

#[test]
fn soft_stop_is_idempotent() {
    common::setup();
    let mut registry = PoolRegistry::default();
    registry
        .register(&handler::http::<CountedHandler>(), 1, STACK)
        .unwrap();
    registry.soft_stop();
    registry.soft_stop();
}
