//! Shade/content/parking layer stack with derived visibility, scroll, and
//! focus state.
//!
//! Every mutation is synchronous and immediately followed by a synchronous
//! recompute, so no callback can observe an intermediate state. The stack
//! owns z-ordering exclusively; collaborators interact only through the
//! acquire/release and push/pop operations here.

use thiserror::Error;

use crate::model::{DerivedLayerState, LayerId, LayerKind, LayerRecord, ShadeKind, TopLayer};

/// Renderer-facing intents emitted when derived layer state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerEffect {
    /// Toggle document-level scroll suppression.
    SetScrollSuppressed(bool),
    /// Install the global focus-interception handler (rising edge of "any
    /// stacking layer visible").
    InstallFocusTrap,
    /// Remove the global focus-interception handler (falling edge).
    RemoveFocusTrap,
    /// Show only this shade; hide every other shade.
    SetVisibleShade(Option<LayerId>),
    /// Restrict scrolling/overflow to this content layer.
    SetScrollableContent(Option<LayerId>),
    /// The top layer is a shade; any active focus must be blurred.
    BlurActiveFocus,
    /// A content layer lost the top position; record its focus target via
    /// [`LayerStack::note_focus`].
    CaptureFocus(LayerId),
    /// A content layer regained the top position; restore its saved focus.
    RestoreFocus {
        /// Layer becoming top again.
        layer: LayerId,
        /// Focus token captured when the layer last lost top, if any.
        target: Option<String>,
    },
    /// Direct focus into this layer's first focusable (or marked default)
    /// element. Emitted by dialog open, not by the stack itself.
    FocusInto(LayerId),
}

/// Programmer-contract violations against the layer stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// The layer id is not managed by this stack.
    #[error("layer {0:?} is not managed by this stack")]
    UnknownLayer(LayerId),
    /// The operation expected a shade layer.
    #[error("layer {0:?} is not a shade")]
    NotAShade(LayerId),
    /// The operation expected a content layer.
    #[error("layer {0:?} is not a content layer")]
    NotAContentLayer(LayerId),
    /// The operation expected a parking layer.
    #[error("layer {0:?} is not a parking layer")]
    NotAParkingLayer(LayerId),
}

/// Handle to an acquired shade; release through [`LayerStack::release_shade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadeHandle {
    id: LayerId,
    kind: ShadeKind,
}

impl ShadeHandle {
    /// The shade's layer id.
    pub fn id(&self) -> LayerId {
        self.id
    }

    /// The shade flavor this handle acquired.
    pub fn kind(&self) -> ShadeKind {
        self.kind
    }
}

/// Ordered collection of shade/content/parking layers and their derived
/// visibility/focus state.
#[derive(Debug, Default)]
pub struct LayerStack {
    next_id: u64,
    next_z: u64,
    layers: Vec<LayerRecord>,
    derived: DerivedLayerState,
}

impl LayerStack {
    /// Creates an empty stack over the base document.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            next_z: 1,
            layers: Vec::new(),
            derived: DerivedLayerState::default(),
        }
    }

    /// Current derived stacking state.
    pub fn derived(&self) -> &DerivedLayerState {
        &self.derived
    }

    /// Looks up a managed layer.
    pub fn record(&self, id: LayerId) -> Option<&LayerRecord> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    /// Whether the stack manages `id`.
    pub fn contains(&self, id: LayerId) -> bool {
        self.record(id).is_some()
    }

    /// Reference count of a shade layer.
    pub fn shade_ref_count(&self, id: LayerId) -> Option<u32> {
        self.record(id)
            .filter(|layer| layer.kind.is_shade())
            .map(|layer| layer.ref_count)
    }

    /// Number of live shade layers of any flavor.
    pub fn live_shade_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| layer.kind.is_shade())
            .count()
    }

    /// Next z-order value the stack would assign.
    pub fn z_budget(&self) -> u64 {
        self.next_z
    }

    /// Acquires a shade, coalescing onto an existing one where the
    /// invariants allow it.
    ///
    /// Loading shades are a singleton pinned above every other stacking
    /// layer. Normal shades reuse the topmost existing normal shade unless a
    /// content layer already sits above it, in which case a fresh shade is
    /// created above that content layer.
    pub fn acquire_shade(&mut self, kind: ShadeKind) -> (ShadeHandle, Vec<LayerEffect>) {
        let reusable = match kind {
            ShadeKind::Loading => self.topmost(|layer| layer.kind == LayerKind::Shade(ShadeKind::Loading)),
            ShadeKind::Normal => {
                let shade = self.topmost(|layer| layer.kind == LayerKind::Shade(ShadeKind::Normal));
                shade.filter(|&(_, shade_z)| {
                    !self
                        .layers
                        .iter()
                        .any(|layer| layer.kind == LayerKind::Content && layer.z_order > shade_z)
                })
            }
        };

        let id = match reusable {
            Some((id, _)) => {
                if let Some(layer) = self.layers.iter_mut().find(|layer| layer.id == id) {
                    layer.ref_count += 1;
                }
                id
            }
            None => self.alloc(LayerKind::Shade(kind)),
        };

        let effects = self.recompute(None);
        (ShadeHandle { id, kind }, effects)
    }

    /// Releases one acquisition of a shade; the layer is destroyed when its
    /// reference count reaches zero.
    pub fn release_shade(&mut self, handle: &ShadeHandle) -> Result<Vec<LayerEffect>, LayerError> {
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == handle.id())
            .ok_or(LayerError::UnknownLayer(handle.id()))?;
        if !self.layers[index].kind.is_shade() {
            return Err(LayerError::NotAShade(handle.id()));
        }

        let layer = &mut self.layers[index];
        layer.ref_count = layer.ref_count.saturating_sub(1);
        if layer.ref_count == 0 {
            self.layers.remove(index);
        }
        Ok(self.recompute(None))
    }

    /// Pushes a fresh content layer above everything currently stacked.
    pub fn push_content_layer(&mut self) -> (LayerId, Vec<LayerEffect>) {
        let id = self.alloc(LayerKind::Content);
        let effects = self.recompute(Some(id));
        (id, effects)
    }

    /// Pops a content layer the caller owns.
    pub fn pop_content_layer(&mut self, id: LayerId) -> Result<Vec<LayerEffect>, LayerError> {
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or(LayerError::UnknownLayer(id))?;
        if self.layers[index].kind != LayerKind::Content {
            return Err(LayerError::NotAContentLayer(id));
        }
        self.layers.remove(index);
        Ok(self.recompute(None))
    }

    /// Creates a parking layer; parking layers never affect stacking or
    /// focus, so no effects can result.
    pub fn push_parking_layer(&mut self) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        self.layers.push(LayerRecord {
            id,
            kind: LayerKind::Parking,
            z_order: 0,
            ref_count: 1,
            saved_focus: None,
        });
        id
    }

    /// Removes a parking layer the caller owns.
    pub fn pop_parking_layer(&mut self, id: LayerId) -> Result<(), LayerError> {
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or(LayerError::UnknownLayer(id))?;
        if self.layers[index].kind != LayerKind::Parking {
            return Err(LayerError::NotAParkingLayer(id));
        }
        self.layers.remove(index);
        Ok(())
    }

    /// Records the renderer-captured focus target for a layer, typically in
    /// response to [`LayerEffect::CaptureFocus`].
    pub fn note_focus(
        &mut self,
        id: LayerId,
        target: impl Into<String>,
    ) -> Result<(), LayerError> {
        let layer = self
            .layers
            .iter_mut()
            .find(|layer| layer.id == id)
            .ok_or(LayerError::UnknownLayer(id))?;
        layer.saved_focus = Some(target.into());
        Ok(())
    }

    fn alloc(&mut self, kind: LayerKind) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        let z_order = self.bump_z();
        self.layers.push(LayerRecord {
            id,
            kind,
            z_order,
            ref_count: 1,
            saved_focus: None,
        });
        id
    }

    fn bump_z(&mut self) -> u64 {
        let z = self.next_z;
        self.next_z += 1;
        z
    }

    fn topmost<F: Fn(&LayerRecord) -> bool>(&self, predicate: F) -> Option<(LayerId, u64)> {
        self.layers
            .iter()
            .filter(|layer| predicate(layer))
            .max_by_key(|layer| layer.z_order)
            .map(|layer| (layer.id, layer.z_order))
    }

    /// Recomputes derived state and returns the edge-triggered effects.
    ///
    /// `created` names a layer introduced by the current mutation so a brand
    /// new top layer does not trigger a focus restore.
    fn recompute(&mut self, created: Option<LayerId>) -> Vec<LayerEffect> {
        let prev = self.derived.clone();

        // The loading shade stays pinned above every other stacking layer.
        let max_other_z = self
            .layers
            .iter()
            .filter(|layer| {
                layer.kind.affects_stacking() && layer.kind != LayerKind::Shade(ShadeKind::Loading)
            })
            .map(|layer| layer.z_order)
            .max();
        if let Some(max_other_z) = max_other_z {
            let needs_pin = self
                .layers
                .iter()
                .any(|layer| {
                    layer.kind == LayerKind::Shade(ShadeKind::Loading)
                        && layer.z_order < max_other_z
                });
            if needs_pin {
                let z_order = self.bump_z();
                if let Some(loading) = self
                    .layers
                    .iter_mut()
                    .find(|layer| layer.kind == LayerKind::Shade(ShadeKind::Loading))
                {
                    loading.z_order = z_order;
                }
            }
        }

        // Reclaim the z budget so removals shrink the counter again.
        self.next_z = self
            .layers
            .iter()
            .filter(|layer| layer.kind.affects_stacking())
            .map(|layer| layer.z_order)
            .max()
            .map_or(1, |max_z| max_z + 1);

        let top = self
            .topmost(|layer| layer.kind.affects_stacking())
            .map_or(TopLayer::Base, |(id, _)| TopLayer::Layer(id));
        let visible_shade = self.topmost(|layer| layer.kind.is_shade()).map(|(id, _)| id);
        let scrollable_content = self
            .topmost(|layer| layer.kind == LayerKind::Content)
            .map(|(id, _)| id);
        let any_stacking = self.layers.iter().any(|layer| layer.kind.affects_stacking());

        let next = DerivedLayerState {
            top,
            scroll_suppressed: any_stacking,
            visible_shade,
            scrollable_content,
            focus_trap_installed: any_stacking,
        };

        let mut effects = Vec::new();
        if next.scroll_suppressed != prev.scroll_suppressed {
            effects.push(LayerEffect::SetScrollSuppressed(next.scroll_suppressed));
        }
        if next.focus_trap_installed && !prev.focus_trap_installed {
            effects.push(LayerEffect::InstallFocusTrap);
        }
        if !next.focus_trap_installed && prev.focus_trap_installed {
            effects.push(LayerEffect::RemoveFocusTrap);
        }
        if next.visible_shade != prev.visible_shade {
            effects.push(LayerEffect::SetVisibleShade(next.visible_shade));
        }
        if next.scrollable_content != prev.scrollable_content {
            effects.push(LayerEffect::SetScrollableContent(next.scrollable_content));
        }

        if next.top != prev.top {
            if let TopLayer::Layer(lost) = prev.top {
                let lost_content = self
                    .record(lost)
                    .map(|layer| layer.kind == LayerKind::Content)
                    .unwrap_or(false);
                if lost_content {
                    effects.push(LayerEffect::CaptureFocus(lost));
                }
            }
            if let TopLayer::Layer(gained) = next.top {
                match self.record(gained).map(|layer| layer.kind) {
                    Some(LayerKind::Shade(_)) => effects.push(LayerEffect::BlurActiveFocus),
                    Some(LayerKind::Content) if created != Some(gained) => {
                        let target = self
                            .record(gained)
                            .and_then(|layer| layer.saved_focus.clone());
                        effects.push(LayerEffect::RestoreFocus {
                            layer: gained,
                            target,
                        });
                    }
                    _ => {}
                }
            }
        }

        self.derived = next;
        effects
    }
}
