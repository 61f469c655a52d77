use std::sync::{Arc, Mutex};
use std::time::Duration;

use fieldstore::{ManualClock, Middleware, MiddlewareError, Store, StoreConfig, Timing, store_state};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

store_state! {
    #[derive(Clone, Debug)]
    struct Form {
        email: String => EMAIL,
        age: u32 => AGE,
    }
}

fn form() -> Form {
    Form {
        email: String::new(),
        age: 30,
    }
}

#[derive(Clone, Debug)]
struct Captured {
    level: Level,
    message: String,
    store: Option<String>,
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Captured>>>,
}

#[derive(Default)]
struct Fields {
    message: String,
    store: Option<String>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "store" {
            self.store = Some(value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "store" => self.store = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for Recorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        self.events.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            message: fields.message,
            store: fields.store,
        });
    }
}

fn capture(f: impl FnOnce()) -> Vec<Captured> {
    let recorder = Recorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    tracing::subscriber::with_default(subscriber, f);
    recorder.events.lock().unwrap().clone()
}

fn at(events: &[Captured], level: Level) -> Vec<&Captured> {
    events.iter().filter(|e| e.level == level).collect()
}

#[test]
fn interceptor_fault_is_warned_with_store_label() {
    let events = capture(|| {
        let store = Store::with_config(form(), StoreConfig::default().with_label("signup"));
        let _validate = store.add_middleware(
            Middleware::new(|_, update, next| {
                if update.get(Form::EMAIL).is_some_and(|e| !e.contains('@')) {
                    return Err(MiddlewareError::rejected("email needs an @"));
                }
                next.proceed();
                Ok(())
            })
            .named("email-check"),
        );
        store.set_key(Form::EMAIL, "nope".to_string());
        assert_eq!(store.get_key(Form::EMAIL), "");
    });

    let warnings = at(&events, Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("middleware fault"));
    assert_eq!(warnings[0].store.as_deref(), Some("signup"));
}

#[test]
fn interceptor_panic_is_warned() {
    let events = capture(|| {
        let store = Store::new(form());
        let _boom = store.add_middleware(Middleware::new(|_, _, _| panic!("kaboom")));
        store.set_key(Form::AGE, 31);
        assert_eq!(store.get_key(Form::AGE), 30);
    });
    assert_eq!(at(&events, Level::WARN).len(), 1);
}

#[test]
fn panic_capture_can_be_disabled() {
    let store = Store::with_config(form(), StoreConfig::default().with_middleware_panic_capture(false));
    let _boom = store.add_middleware(Middleware::new(|_, _, _| panic!("kaboom")));
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.set_key(Form::AGE, 31)));
    assert!(outcome.is_err());
    assert_eq!(store.get_key(Form::AGE), 30);
}

#[test]
fn blocked_write_is_debug_not_warning() {
    let events = capture(|| {
        let store = Store::new(form());
        let _gate = store.add_middleware(Middleware::new(|_, _, _| Ok(())));
        store.set_key(Form::AGE, 40);
    });
    assert!(at(&events, Level::WARN).is_empty());
    assert!(
        at(&events, Level::DEBUG)
            .iter()
            .any(|e| e.message.contains("blocked"))
    );
}

#[test]
fn batch_flush_is_logged() {
    let events = capture(|| {
        let store = Store::new(form());
        let _sub = store.subscribe(&[Form::AGE.id()], || {});
        store.batch(|| {
            store.set_key(Form::AGE, 1);
            store.set_key(Form::AGE, 2);
        });
    });
    assert!(
        at(&events, Level::DEBUG)
            .iter()
            .any(|e| e.message.contains("flushing batch"))
    );
}

#[test]
fn debounce_supersession_is_traced() {
    let clock = ManualClock::new();
    let events = capture(|| {
        let store = Store::with_config(form(), StoreConfig::default().with_clock(clock.clone()));
        let delay = Timing::debounce(Duration::from_millis(30));
        store.set_key_with(Form::AGE, 1, delay);
        store.set_key_with(Form::AGE, 2, delay);
    });
    assert!(
        at(&events, Level::TRACE)
            .iter()
            .any(|e| e.message.contains("superseded"))
    );
}
