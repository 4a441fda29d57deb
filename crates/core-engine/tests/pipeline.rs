//! Full editing pipeline: serializer, proxy, peer host and the in-process peers.

use core_actions::{
    ActionSerializer, ElementType, Gesture, Position, SelectedElement, SelectionSet,
    SharedSelection, Submitted,
};
use core_config::ViewOptions;
use core_engine::{EnginePeer, ExportPeer, ValidatorPeer};
use core_events::{ComponentId, Dispatcher, Event, EventKind};
use core_rpc::{
    Deferred, EngineMethod, ExportMethod, Method, PeerHandler, PeerHost, RemoteProxy,
    ValidatorMethod, pair,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

const DOC: &str = r#"<?xml version="1.0"?>
<mei meiversion="5.0"><music><body><mdiv><score><section>
  <note xml:id="note-1" pname="c" oct="4" dur="4"/>
  <note xml:id="note-2" pname="e" oct="4" dur="4"/>
  <dir xml:id="dir-1">dolce &amp; cantabile</dir>
</section></score></mdiv></body></music></mei>"#;

/// Proxy plus its ready signal, registered before the host starts.
fn connect<H: PeerHandler>(
    name: &'static str,
    handler: H,
) -> (Arc<RemoteProxy<H::Method>>, Deferred<()>) {
    let (proxy_end, peer_end) = pair();
    let proxy = Arc::new(RemoteProxy::spawn(name, proxy_end));
    let ready = proxy.on_ready();
    PeerHost::new(name, peer_end, handler).spawn();
    (proxy, ready)
}

async fn call<M: Method>(proxy: &RemoteProxy<M>, method: M, args: Vec<Value>) -> Value {
    proxy.invoke(method, args).wait().await
}

#[tokio::test]
async fn drag_and_insert_reach_the_document() {
    let (engine, ready) = connect("engine", EnginePeer::new());
    ready.wait().await;
    assert_eq!(
        call(&engine, EngineMethod::LoadData, vec![json!(DOC)]).await,
        json!(true)
    );

    let selection = SharedSelection::default();
    let events = Dispatcher::new("app");
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        events.bind(ComponentId::next(), EventKind::UpdateData, move |event| {
            if let Event::UpdateData { document, .. } = event {
                seen.lock().unwrap().push(document.to_string());
            }
            true
        });
    }
    let serializer =
        ActionSerializer::new(Arc::clone(&engine), Arc::new(selection.clone()), events);
    serializer.set_page_bounds(1, 1);
    let opts = ViewOptions::default();

    selection.replace(SelectionSet::new(vec![SelectedElement::new(
        "note-2",
        ElementType::Note,
        Position::new(340, 200),
    )]));
    let drag = serializer
        .submit(Gesture::Drag { dx: 10, dy: -30 }, opts)
        .await
        .unwrap();
    assert!(matches!(drag, Submitted::Applied(ref r) if r.accepted));
    let render = serializer.last_render().unwrap();
    assert_eq!(render.page, 1);
    assert!(
        render
            .svg
            .contains("id=\"note-2\" class=\"note\" transform=\"translate(350, 170)\"")
    );

    let insert = Gesture::Insert {
        element_type: ElementType::Dynam,
        reference: None,
        target: Position::new(90, 400),
    };
    let out = serializer.submit(insert, opts).await.unwrap();
    assert!(matches!(out, Submitted::Applied(ref r) if r.accepted && r.steps == 2));

    let mei = serializer.snapshot().unwrap();
    assert!(mei.contains(
        r#"<note xml:id="note-2" dur="4" oct="4" pname="e" x="350" y="170"/>"#
    ));
    assert!(mei.contains(r##"<dynam xml:id="dynam-1" startid="#note-2" x="90" y="400"/>"##));
    assert!(mei.contains("dolce &amp; cantabile"));
    assert_eq!(
        seen.lock().unwrap().last().map(String::as_str),
        Some(&*mei)
    );
    assert!(!serializer.is_busy());
}

#[tokio::test]
async fn rejected_chain_leaves_document_untouched() {
    let (engine, _ready) = connect("engine", EnginePeer::new());
    call(&engine, EngineMethod::LoadData, vec![json!(DOC)]).await;
    let before = call(&engine, EngineMethod::GetMei, vec![]).await;

    let selection = SharedSelection::new(SelectionSet::new(vec![
        SelectedElement::new("note-1", ElementType::Note, Position::default()),
        SelectedElement::new("note-9", ElementType::Note, Position::default()),
    ]));
    let serializer = ActionSerializer::new(
        Arc::clone(&engine),
        Arc::new(selection),
        Dispatcher::new("app"),
    );
    let out = serializer
        .submit(Gesture::Drag { dx: 1, dy: 1 }, ViewOptions::default())
        .await
        .unwrap();
    assert!(matches!(out, Submitted::Applied(ref r) if !r.accepted));
    assert_eq!(call(&engine, EngineMethod::GetMei, vec![]).await, before);
}

#[tokio::test]
async fn validator_and_export_peers_answer_over_the_wire() {
    let (validator, _) = connect("validator", ValidatorPeer::new());
    let (export, _) = connect("export", ExportPeer::new());

    assert_eq!(
        call(&validator, ValidatorMethod::Validate, vec![json!(DOC)]).await,
        json!([{"message": "no schema loaded"}])
    );
    assert_eq!(
        call(&validator, ValidatorMethod::SetSchema, vec![json!("mei-all.rng")]).await,
        json!(true)
    );
    assert_eq!(
        call(&validator, ValidatorMethod::Validate, vec![json!(DOC)]).await,
        json!([])
    );

    let pdf = call(&export, ExportMethod::RenderToPdf, vec![json!(DOC)]).await;
    assert!(pdf.as_str().unwrap().contains("/Count 1"));
    let midi = call(&export, ExportMethod::RenderToMidi, vec![json!(DOC)]).await;
    let bytes: Vec<u8> = serde_json::from_value(midi).unwrap();
    assert_eq!(&bytes[..4], b"MThd");
    assert_eq!(
        call(&export, ExportMethod::RenderToMidi, vec![json!("<nope")]).await,
        Value::Null
    );
}
