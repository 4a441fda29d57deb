//! Method catalogues.
//!
//! Each peer exposes a fixed set of operations. Rather than forwarding
//! arbitrary names, callers pick a variant from the peer's enum and pass it to
//! `RemoteProxy::invoke`; the wire name is derived from the variant.

use std::fmt;

/// An operation a peer understands.
pub trait Method: Copy + fmt::Debug + Send + Sync + 'static {
    /// Name placed in the request's `methodName` field.
    fn name(self) -> &'static str;
    /// Reverse lookup used on the peer side.
    fn from_name(name: &str) -> Option<Self>;
}

macro_rules! method_catalogue {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name { $($variant),+ }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl Method for $name {
            fn name(self) -> &'static str {
                match self { $($name::$variant => $wire),+ }
            }

            fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

method_catalogue! {
    /// Rendering/layout engine operations.
    pub enum EngineMethod {
        LoadData => "loadData",
        SetOptions => "setOptions",
        Edit => "edit",
        RedoLayout => "redoLayout",
        RedoPagePitchPosLayout => "redoPagePitchPosLayout",
        RenderToSvg => "renderToSVG",
        GetPageCount => "getPageCount",
        GetPageWithElement => "getPageWithElement",
        GetMei => "getMEI",
    }
}

method_catalogue! {
    /// Schema validator operations.
    pub enum ValidatorMethod {
        SetSchema => "setSchema",
        Validate => "validate",
    }
}

method_catalogue! {
    /// Document export operations.
    pub enum ExportMethod {
        RenderToPdf => "renderToPDF",
        RenderToMidi => "renderToMidi",
    }
}
