//! In-process peers that speak the `core-rpc` protocol.
//!
//! The editor only ever talks to its engines through a `RemoteProxy`; these
//! handlers let the binary and the tests run the whole pipeline without an
//! external process. Each one is a `PeerHandler` and is served by a
//! `PeerHost` on its own task.
//!
//! * `document`  - flat score model, parsed from and written back to MEI text
//! * `edit`      - applies edit operations and atomic chains to a score
//! * `layout`    - pagination and SVG page rendering
//! * `engine`    - rendering/layout engine peer
//! * `validator` - schema validator peer
//! * `export`    - PDF / MIDI export peer

pub mod document;
pub mod edit;
pub mod engine;
pub mod export;
pub mod layout;
pub mod validator;

pub use document::{Element, Score};
pub use engine::EnginePeer;
pub use export::ExportPeer;
pub use layout::{EngineOptions, Pagination};
pub use validator::{Diagnostic, ValidatorPeer};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("xml escape: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),
    #[error("document is not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("document has no <mei> root")]
    NotMei,
    #[error("duplicate xml:id `{0}`")]
    DuplicateId(String),
    #[error("no element with id `{0}`")]
    UnknownId(String),
    #[error("cannot insert element of type `{0}`")]
    UnsupportedType(String),
    #[error("`[chained-id]` used without a preceding step")]
    NoChainedId,
    #[error("element `{0}` has no pitch")]
    NotPitched(String),
    #[error("key code {0} has no edit binding")]
    UnboundKey(u32),
}

pub type EngineResult<T> = Result<T, EngineError>;
