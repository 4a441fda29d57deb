use core_rpc::{Method, PeerHandler, PeerHost, RemoteProxy, ValidatorMethod, pair};
use serde_json::{Value, json};

#[derive(Default)]
struct CountingValidator {
    schema: Option<String>,
    seen: Vec<&'static str>,
}

impl PeerHandler for CountingValidator {
    type Method = ValidatorMethod;

    async fn handle(&mut self, method: ValidatorMethod, arguments: Vec<Value>) -> Value {
        self.seen.push(method.name());
        match method {
            ValidatorMethod::SetSchema => {
                self.schema = arguments.first().and_then(Value::as_str).map(str::to_owned);
                json!(true)
            }
            ValidatorMethod::Validate => match self.schema {
                Some(_) => json!([]),
                None => json!([{"message": "no schema loaded"}]),
            },
        }
    }
}

#[tokio::test]
async fn ready_registered_before_start_resolves() {
    let (proxy_end, peer_end) = pair();
    let proxy = RemoteProxy::<ValidatorMethod>::spawn("validator", proxy_end);
    let ready = proxy.on_ready();
    let host = PeerHost::new("validator", peer_end, CountingValidator::default()).spawn();

    ready.await;
    let missing = proxy.invoke(ValidatorMethod::Validate, vec![json!("<mei/>")]).await;
    assert_eq!(missing, json!([{"message": "no schema loaded"}]));
    assert_eq!(
        proxy.invoke(ValidatorMethod::SetSchema, vec![json!("mei-all.rng")]).await,
        json!(true)
    );
    assert_eq!(
        proxy.invoke(ValidatorMethod::Validate, vec![json!("<mei/>")]).await,
        json!([])
    );

    drop(proxy);
    let handler = host.await.unwrap();
    assert_eq!(handler.schema.as_deref(), Some("mei-all.rng"));
    assert_eq!(handler.seen, vec!["validate", "setSchema", "validate"]);
}

#[tokio::test]
async fn ready_registered_after_announcement_waits_for_next_one() {
    let (proxy_end, peer_end) = pair();
    let proxy = RemoteProxy::<ValidatorMethod>::spawn("validator", proxy_end);
    let first = proxy.on_ready();
    peer_end.announce_ready().unwrap();
    first.await;

    let late = proxy.on_ready();
    let waited =
        tokio::time::timeout(std::time::Duration::from_millis(20), late.clone().wait()).await;
    assert!(waited.is_err(), "earlier readiness is not replayed");

    peer_end.announce_ready().unwrap();
    late.await;
}
