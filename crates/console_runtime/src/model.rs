//! Pure data model for the console's layered overlay system.

use serde::{Deserialize, Serialize};

/// Stable layer identifier assigned by the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u64);

/// Shade flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShadeKind {
    /// Interaction-blocking overlay under modal content.
    Normal,
    /// Singleton busy overlay pinned above everything.
    Loading,
}

/// Kind of a managed layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    /// Reference-counted overlay blocking interaction with lower content.
    Shade(ShadeKind),
    /// Stacked visible region hosting one dialog's content.
    Content,
    /// Off-screen holding area; never affects stacking or focus.
    Parking,
}

impl LayerKind {
    /// Whether the layer participates in z-ordering, focus, and scroll
    /// suppression.
    pub const fn affects_stacking(self) -> bool {
        matches!(self, Self::Shade(_) | Self::Content)
    }

    /// Whether the layer is a shade of any flavor.
    pub const fn is_shade(self) -> bool {
        matches!(self, Self::Shade(_))
    }
}

/// One managed layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Stable identifier.
    pub id: LayerId,
    /// Layer kind.
    pub kind: LayerKind,
    /// Monotonic stacking order; meaningless for parking layers.
    pub z_order: u64,
    /// Acquirer count; only shades are shared.
    pub ref_count: u32,
    /// Renderer-supplied focus token captured while the layer was top.
    pub saved_focus: Option<String>,
}

/// The layer currently receiving interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopLayer {
    /// No stacking layer exists; the base document is interactive.
    #[default]
    Base,
    /// The identified shade or content layer is top.
    Layer(LayerId),
}

/// Derived stacking state recomputed synchronously after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DerivedLayerState {
    /// Highest shade-or-content layer, or the base document.
    pub top: TopLayer,
    /// Whether document-level scrolling is suppressed.
    pub scroll_suppressed: bool,
    /// The single shade allowed to be visible (the topmost one).
    pub visible_shade: Option<LayerId>,
    /// The content layer allowed to scroll (the topmost one).
    pub scrollable_content: Option<LayerId>,
    /// Whether the global focus-interception handler is installed.
    pub focus_trap_installed: bool,
}
