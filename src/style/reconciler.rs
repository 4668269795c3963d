//! The style reconciliation state machine.
//!
//! One [`Reconciler::run_pass`] call reconciles all three concerns against
//! the current editor state. Passes are driven exclusively from the
//! serialized queue in [`super::automation`]; nothing here is re-entrant.
//!
//! Per concern the machine is two-state: *idle* (nothing persisted) and
//! *applied* (automation owns the live value, the user's prior value is
//! captured). The capture is persisted to the state store *before* the
//! configuration write, and rolled back to the pre-attempt record if the
//! host rejects the write, so a crash or rejection at any point leaves a
//! restorable state. A failure in one concern never blocks the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::host::{DocumentInfo, Workbench};
use crate::overlay::{TokenCustomization, build_injected, has_injected, strip_injected};
use crate::settings::{ConfigTier, SettingsAccessor};
use crate::state::{Concern, ConcernState, StateStore};
use crate::theme::{ThemeAssets, Variant, is_bundled_label, label_for, resolve_variant};
use crate::Result;

use super::{SemanticMode, StyleSettings, TokenMode, keys};

/// Why a pass was scheduled. Triggers arriving before the pass runs are
/// coalesced into one set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReasonSet {
    /// Extension activation.
    pub init: bool,
    /// Active or visible editor set changed.
    pub editor: bool,
    /// Host color theme changed.
    pub theme: bool,
    /// A relevant configuration key changed.
    pub config: bool,
    /// The leave-debounce timer expired.
    pub leave_timer: bool,
}

impl ReasonSet {
    /// True if any reason is set.
    pub fn any(&self) -> bool {
        self.init || self.editor || self.theme || self.config || self.leave_timer
    }

    /// True if anything besides plain editor focus fired. Focus moving
    /// between two Hypatia editors is a no-op without one of these.
    pub fn beyond_editor(&self) -> bool {
        self.init || self.theme || self.config
    }
}

/// What the queue should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing pending.
    Settled,
    /// The session looks over, but leave detection is debounced: run a
    /// leave-timer pass after this delay unless something re-enters first.
    DebounceLeave(Duration),
}

/// RAII guard suppressing configuration-change triggers for the duration of
/// a self-initiated write.
///
/// The host fires its configuration-change event synchronously from inside
/// the write; without this guard every automated write would schedule
/// another pass, which could write again, looping forever. The flag is
/// released on drop, so it clears even when the write errors out.
pub struct SwitchGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SwitchGuard<'a> {
    /// Raise the flag for the guard's lifetime.
    pub fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The style-automation state machine.
pub struct Reconciler {
    accessor: SettingsAccessor,
    state: Arc<dyn StateStore>,
    workbench: Arc<dyn Workbench>,
    assets: ThemeAssets,
    switching: Arc<AtomicBool>,
    /// A Hypatia document is the current session's subject.
    current: bool,
}

impl Reconciler {
    /// Build a reconciler over the injected host surfaces. `switching` is
    /// shared with whatever filters configuration-change triggers.
    pub fn new(
        accessor: SettingsAccessor,
        state: Arc<dyn StateStore>,
        workbench: Arc<dyn Workbench>,
        assets: ThemeAssets,
        switching: Arc<AtomicBool>,
    ) -> Self {
        Self {
            accessor,
            state,
            workbench,
            assets,
            switching,
            current: false,
        }
    }

    /// True while a Hypatia session is considered current.
    pub fn is_current(&self) -> bool {
        self.current
    }

    /// Run one reconciliation pass for the coalesced `reasons`.
    pub fn run_pass(&mut self, reasons: ReasonSet) -> PassOutcome {
        let settings = StyleSettings::load(&self.accessor);
        let active = self.workbench.active_document();
        let hypatia_active = active.as_ref().is_some_and(DocumentInfo::is_hypatia);
        let hypatia_visible = hypatia_active
            || self
                .workbench
                .visible_documents()
                .iter()
                .any(DocumentInfo::is_hypatia);

        if settings.trace {
            info!(
                ?reasons,
                hypatia_active,
                hypatia_visible,
                current = self.current,
                "reconciliation pass"
            );
        } else {
            debug!(?reasons, hypatia_active, current = self.current, "reconciliation pass");
        }

        if hypatia_active {
            let first_entry = !self.current;
            self.current = true;
            if !first_entry && !reasons.beyond_editor() {
                // Focus moved from one Hypatia editor to another; everything
                // is already in place.
                return PassOutcome::Settled;
            }
            // Entry order: semantic override, whole theme, token overlay.
            // The overlay resolves its variant against the live theme kind,
            // so the theme has to settle first.
            self.concern_step(Concern::Semantic, |r| r.reconcile_semantic(&settings));
            self.concern_step(Concern::Theme, |r| r.reconcile_theme(&settings));
            self.concern_step(Concern::Tokens, |r| r.reconcile_tokens(&settings));
            return PassOutcome::Settled;
        }

        if hypatia_visible {
            // A Hypatia editor is still visible somewhere. A focus gap or a
            // non-Hypatia editor taking focus is not a leave.
            return PassOutcome::Settled;
        }

        if !self.current {
            return PassOutcome::Settled;
        }

        if reasons.leave_timer || settings.leave_debounce.is_zero() {
            self.leave();
            PassOutcome::Settled
        } else {
            PassOutcome::DebounceLeave(settings.leave_debounce)
        }
    }

    /// Restore all three concerns and end the session. Also the deactivation
    /// path, so a disabled or never-applied concern must no-op cleanly.
    pub fn leave(&mut self) {
        // Leave order: overlay first, whole theme last. The theme switch is
        // the most visible change; undoing the overlay first avoids flashing
        // our rules on top of a just-restored foreign theme.
        self.concern_step(Concern::Tokens, Reconciler::restore_tokens);
        self.concern_step(Concern::Semantic, Reconciler::restore_semantic);
        self.concern_step(Concern::Theme, Reconciler::restore_theme);
        self.current = false;
    }

    /// Run one concern's apply/restore, isolating its failure from the rest
    /// of the pass.
    fn concern_step(&mut self, concern: Concern, step: impl FnOnce(&mut Self) -> Result<()>) {
        if let Err(e) = step(self) {
            warn!(%concern, error = %e, "concern reconciliation failed, continuing pass");
        }
    }

    /// Write through the accessor with the switching flag raised, so the
    /// resulting configuration-change event is recognized as our own.
    fn guarded_write(
        &self,
        key: &str,
        value: Option<Value>,
        target: ConfigTier,
    ) -> Result<ConfigTier> {
        let _guard = SwitchGuard::acquire(&self.switching);
        self.accessor.write(key, value, target, None)
    }

    // ------------------------------------------------------------------
    // Whole theme
    // ------------------------------------------------------------------

    fn reconcile_theme(&mut self, settings: &StyleSettings) -> Result<()> {
        if !settings.autotheme {
            return self.restore_theme();
        }

        let live = self.workbench.active_theme();
        let variant = resolve_variant(settings.variant, live.kind);
        let desired = label_for(variant);
        let mut st = ConcernState::load(self.state.as_ref(), Concern::Theme);
        let prev = st.clone();

        if live.label == desired {
            // Already there: confirm ownership without writing.
            if !st.applied || st.applied_label.as_deref() != Some(desired) {
                st.applied = true;
                st.applied_label = Some(desired.to_string());
                if st.target.is_none() {
                    st.target = Some(self.accessor.pick_target(keys::COLOR_THEME, None));
                }
                st.save(self.state.as_ref(), Concern::Theme)?;
            }
            return Ok(());
        }

        if !is_bundled_label(&live.label) && st.saved_value.is_none() {
            // A foreign theme is live; remember it before the first switch.
            st.saved_value = Some(Value::String(live.label.clone()));
        }
        let target = st
            .target
            .unwrap_or_else(|| self.accessor.pick_target(keys::COLOR_THEME, None));
        st.target = Some(target);
        st.save(self.state.as_ref(), Concern::Theme)?;

        match self.guarded_write(keys::COLOR_THEME, Some(Value::String(desired.into())), target) {
            Ok(tier) => {
                st.applied = true;
                st.applied_label = Some(desired.to_string());
                st.target = Some(tier);
                st.save(self.state.as_ref(), Concern::Theme)?;
                debug!(theme = desired, %tier, "applied workbench theme");
                Ok(())
            }
            Err(e) => {
                rollback(self.state.as_ref(), Concern::Theme, &prev)?;
                Err(e)
            }
        }
    }

    fn restore_theme(&mut self) -> Result<()> {
        let st = ConcernState::load(self.state.as_ref(), Concern::Theme);
        if !st.applied {
            return Ok(());
        }

        let live = self.workbench.active_theme();
        let result = if st.saved_value.is_some()
            && st.applied_label.as_deref() == Some(live.label.as_str())
        {
            let value = restore_value(&st);
            let target = st
                .target
                .unwrap_or_else(|| self.accessor.pick_target(keys::COLOR_THEME, None));
            self.guarded_write(keys::COLOR_THEME, value, target).map(|_| ())
        } else {
            // The live theme is no longer the one we set (or we never had a
            // capture): someone else owns it now, leave it alone.
            debug!(live = %live.label, "skipping theme restore, live theme not ours");
            Ok(())
        };

        // Restoration is attempted at most once per session, whatever the
        // write outcome.
        ConcernState::clear(self.state.as_ref(), Concern::Theme)?;
        result
    }

    // ------------------------------------------------------------------
    // Token overlay
    // ------------------------------------------------------------------

    fn reconcile_tokens(&mut self, settings: &StyleSettings) -> Result<()> {
        let variant = match settings.autotokens {
            TokenMode::Off => return self.restore_tokens(),
            TokenMode::Light => Variant::Light,
            TokenMode::Dark => Variant::Dark,
            TokenMode::Auto => {
                resolve_variant(settings.variant, self.workbench.active_theme().kind)
            }
        };

        let raw = self.accessor.read(keys::TOKEN_CUSTOMIZATIONS, None);
        let live = TokenCustomization::from_value(raw.as_ref());
        let base = strip_injected(&live);
        let mut st = ConcernState::load(self.state.as_ref(), Concern::Tokens);
        let prev = st.clone();

        if !st.applied && st.saved_value.is_none() {
            // First application this session: capture the clean base. If a
            // crashed prior session left marker rules behind, capture the
            // stripped object instead of the polluted one.
            let capture = if has_injected(&live) {
                if base.is_empty() {
                    Value::Null
                } else {
                    serde_json::to_value(&base)?
                }
            } else {
                raw.clone().unwrap_or(Value::Null)
            };
            st.saved_value = Some(capture);
        }

        let rules = self.assets.token_colors(variant);
        let mut next = base;
        next.text_mate_rules.extend(build_injected(&rules, variant));

        let target = st
            .target
            .unwrap_or_else(|| self.accessor.pick_target(keys::TOKEN_CUSTOMIZATIONS, None));
        st.target = Some(target);
        st.save(self.state.as_ref(), Concern::Tokens)?;

        let next_value = serde_json::to_value(&next)?;
        match self.guarded_write(keys::TOKEN_CUSTOMIZATIONS, Some(next_value), target) {
            Ok(tier) => {
                st.applied = true;
                st.applied_variant = Some(variant);
                st.target = Some(tier);
                st.save(self.state.as_ref(), Concern::Tokens)?;
                debug!(%variant, rules = rules.len(), %tier, "applied token overlay");
                Ok(())
            }
            Err(e) => {
                rollback(self.state.as_ref(), Concern::Tokens, &prev)?;
                Err(e)
            }
        }
    }

    fn restore_tokens(&mut self) -> Result<()> {
        let raw = self.accessor.read(keys::TOKEN_CUSTOMIZATIONS, None);
        let live = TokenCustomization::from_value(raw.as_ref());
        let st = ConcernState::load(self.state.as_ref(), Concern::Tokens);

        if !st.applied {
            if has_injected(&live) {
                // Safety net: marker rules with no owning record mean a
                // prior session terminated abnormally. Sweep them.
                warn!("found orphaned overlay rules, sweeping");
                let cleaned = strip_injected(&live);
                let value = if cleaned.is_empty() {
                    None
                } else {
                    Some(serde_json::to_value(&cleaned)?)
                };
                let target = self.accessor.pick_target(keys::TOKEN_CUSTOMIZATIONS, None);
                self.guarded_write(keys::TOKEN_CUSTOMIZATIONS, value, target)?;
            }
            ConcernState::clear(self.state.as_ref(), Concern::Tokens)?;
            return Ok(());
        }

        let value = restore_value(&st);
        let target = st
            .target
            .unwrap_or_else(|| self.accessor.pick_target(keys::TOKEN_CUSTOMIZATIONS, None));
        let result = self
            .guarded_write(keys::TOKEN_CUSTOMIZATIONS, value, target)
            .map(|_| ());
        ConcernState::clear(self.state.as_ref(), Concern::Tokens)?;
        result
    }

    // ------------------------------------------------------------------
    // Semantic highlighting
    // ------------------------------------------------------------------

    fn reconcile_semantic(&mut self, settings: &StyleSettings) -> Result<()> {
        match settings.semantic {
            SemanticMode::Inherit => self.restore_semantic(),
            SemanticMode::On => self.apply_semantic(true),
            SemanticMode::Off => self.apply_semantic(false),
        }
    }

    fn apply_semantic(&mut self, desired: bool) -> Result<()> {
        let desired_value = Value::Bool(desired);
        let mut st = ConcernState::load(self.state.as_ref(), Concern::Semantic);
        let prev = st.clone();
        let live = self.accessor.read(keys::SEMANTIC_ENABLED, None);

        if live.as_ref() == Some(&desired_value) {
            // Confirmation, not reapplication.
            if !st.applied || st.last_desired.as_ref() != Some(&desired_value) {
                st.applied = true;
                st.last_desired = Some(desired_value);
                if st.target.is_none() {
                    st.target = Some(self.accessor.pick_target(keys::SEMANTIC_ENABLED, None));
                }
                st.save(self.state.as_ref(), Concern::Semantic)?;
            }
            return Ok(());
        }

        let target = st
            .target
            .unwrap_or_else(|| self.accessor.pick_target(keys::SEMANTIC_ENABLED, None));
        if !st.applied && st.saved_value.is_none() {
            let insp = self.accessor.inspect(keys::SEMANTIC_ENABLED, None);
            let raw = match target {
                ConfigTier::Global => insp.global_value,
                ConfigTier::Workspace => insp.workspace_value,
                ConfigTier::WorkspaceFolder => insp.workspace_folder_value,
            };
            st.saved_value = Some(raw.unwrap_or(Value::Null));
        }
        st.target = Some(target);
        st.save(self.state.as_ref(), Concern::Semantic)?;

        match self.guarded_write(keys::SEMANTIC_ENABLED, Some(desired_value.clone()), target) {
            Ok(tier) => {
                st.applied = true;
                st.last_desired = Some(desired_value);
                st.target = Some(tier);
                st.save(self.state.as_ref(), Concern::Semantic)?;
                debug!(desired, %tier, "applied semantic-highlighting override");
                Ok(())
            }
            Err(e) => {
                rollback(self.state.as_ref(), Concern::Semantic, &prev)?;
                Err(e)
            }
        }
    }

    fn restore_semantic(&mut self) -> Result<()> {
        let st = ConcernState::load(self.state.as_ref(), Concern::Semantic);
        if !st.applied {
            return Ok(());
        }

        let live = self.accessor.read(keys::SEMANTIC_ENABLED, None);
        let result = if st.saved_value.is_some() && live == st.last_desired {
            let value = restore_value(&st);
            let target = st
                .target
                .unwrap_or_else(|| self.accessor.pick_target(keys::SEMANTIC_ENABLED, None));
            self.guarded_write(keys::SEMANTIC_ENABLED, value, target).map(|_| ())
        } else {
            debug!("skipping semantic restore, live value not ours");
            Ok(())
        };

        ConcernState::clear(self.state.as_ref(), Concern::Semantic)?;
        result
    }
}

/// The configuration value a restore should write: the captured prior value,
/// or a removal when the capture recorded the key as absent.
fn restore_value(st: &ConcernState) -> Option<Value> {
    match &st.saved_value {
        Some(Value::Null) | None => None,
        Some(v) => Some(v.clone()),
    }
}

/// Put a concern's persisted record back to its pre-attempt value after a
/// rejected write.
fn rollback(store: &dyn StateStore, concern: Concern, prev: &ConcernState) -> Result<()> {
    if *prev == ConcernState::default() {
        ConcernState::clear(store, concern)
    } else {
        prev.save(store, concern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryWorkbench;
    use crate::settings::{ConfigStore, MemoryConfigStore};
    use crate::state::MemoryStateStore;
    use crate::theme::ThemeKind;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        store: MemoryConfigStore,
        state: MemoryStateStore,
        workbench: MemoryWorkbench,
        reconciler: Reconciler,
        _assets_dir: TempDir,
    }

    /// Build a full fixture: memory host, two bundled theme files with one
    /// rule each, workbench coupled to the colorTheme key.
    fn fixture(theme_label: &str, kind: ThemeKind) -> Fixture {
        let assets_dir = TempDir::new().unwrap();
        for variant in [Variant::Light, Variant::Dark] {
            let body = format!(
                r#"{{"tokenColors": [{{"name": "Keyword", "scope": "keyword", "settings": {{"foreground": "{}"}}}}]}}"#,
                match variant {
                    Variant::Light => "#0000aa",
                    Variant::Dark => "#aaaaff",
                }
            );
            fs::write(assets_dir.path().join(crate::theme::file_for(variant)), body).unwrap();
        }

        let store = MemoryConfigStore::new();
        let workbench = MemoryWorkbench::new(theme_label, kind);
        workbench.attach_to(&store);
        let state = MemoryStateStore::new();
        let accessor = SettingsAccessor::new(Arc::new(store.clone()));
        let reconciler = Reconciler::new(
            accessor,
            Arc::new(state.clone()),
            Arc::new(workbench.clone()),
            ThemeAssets::new(assets_dir.path()),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            store,
            state,
            workbench,
            reconciler,
            _assets_dir: assets_dir,
        }
    }

    fn editor_pass(fx: &mut Fixture) -> PassOutcome {
        fx.reconciler.run_pass(ReasonSet {
            editor: true,
            ..Default::default()
        })
    }

    fn read(fx: &Fixture, key: &str) -> Option<Value> {
        SettingsAccessor::new(Arc::new(fx.store.clone())).read(key, None)
    }

    #[test]
    fn overlay_only_scenario_round_trips_exactly() {
        // autotheme off, autotokens auto, semantic inherit, foreign theme.
        let mut fx = fixture("Solarized Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(false), ConfigTier::Global, None);
        fx.store
            .seed(keys::AUTOTOKENS, json!("auto"), ConfigTier::Global, None);
        let user_rules = json!({
            "textMateRules": [{"name": "mine", "scope": "comment", "settings": {}}]
        });
        fx.store.seed(
            keys::TOKEN_CUSTOMIZATIONS,
            user_rules.clone(),
            ConfigTier::Global,
            None,
        );

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        // Theme and semantic untouched, overlay injected for dark.
        assert_eq!(fx.workbench.active_theme().label, "Solarized Dark");
        assert!(read(&fx, keys::SEMANTIC_ENABLED).is_none());
        let live = TokenCustomization::from_value(read(&fx, keys::TOKEN_CUSTOMIZATIONS).as_ref());
        assert!(has_injected(&live));
        assert_eq!(live.text_mate_rules.len(), 2);
        assert!(
            live.text_mate_rules[1]
                .name
                .as_deref()
                .unwrap()
                .contains("dark")
        );

        // Focus a plain-text document: overlay removed, object exact again.
        fx.workbench.focus(DocumentInfo::new("file:///notes.txt", "plaintext"));
        editor_pass(&mut fx);
        assert_eq!(read(&fx, keys::TOKEN_CUSTOMIZATIONS), Some(user_rules));
        assert_eq!(fx.workbench.active_theme().label, "Solarized Dark");
        assert!(fx.state.is_empty());
        assert!(!fx.reconciler.is_current());
    }

    #[test]
    fn autotheme_captures_and_restores_foreign_theme() {
        let mut fx = fixture("Monokai", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);
        fx.store
            .seed(keys::AUTOTOKENS, json!("off"), ConfigTier::Global, None);
        // Host reports Light kind for Monokai in this scenario.
        fx.workbench.set_active_theme("Monokai", ThemeKind::Light);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        assert_eq!(fx.workbench.active_theme().label, "Hypatia Light");
        let st = ConcernState::load(&fx.state, Concern::Theme);
        assert!(st.applied);
        assert_eq!(st.saved_value, Some(json!("Monokai")));

        fx.workbench.close("file:///a.hyp");
        editor_pass(&mut fx);
        assert_eq!(fx.workbench.active_theme().label, "Monokai");
        assert_eq!(ConcernState::load(&fx.state, Concern::Theme), ConcernState::default());
    }

    #[test]
    fn restore_never_clobbers_external_theme_change() {
        let mut fx = fixture("Monokai", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);
        fx.store
            .seed(keys::AUTOTOKENS, json!("off"), ConfigTier::Global, None);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);
        assert_eq!(fx.workbench.active_theme().label, "Hypatia Dark");

        // User switches themes mid-session, bypassing our writes.
        fx.workbench.set_active_theme("Dracula", ThemeKind::Dark);
        fx.workbench.close("file:///a.hyp");
        editor_pass(&mut fx);

        // The external choice stands; our record is still cleared.
        assert_eq!(fx.workbench.active_theme().label, "Dracula");
        assert_eq!(ConcernState::load(&fx.state, Concern::Theme), ConcernState::default());
    }

    #[test]
    fn second_apply_is_a_confirmed_noop() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);

        let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = writes.clone();
        fx.store.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);
        let after_first = writes.load(Ordering::SeqCst);
        assert!(after_first > 0);

        // Same inputs again (config reason, same document): zero new writes.
        fx.reconciler.run_pass(ReasonSet {
            config: true,
            ..Default::default()
        });
        assert_eq!(writes.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn focus_between_two_hypatia_documents_does_nothing() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = writes.clone();
        fx.store.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        fx.workbench.focus(DocumentInfo::hypatia("file:///b.hyp"));
        editor_pass(&mut fx);
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        assert!(fx.reconciler.is_current());
    }

    #[test]
    fn visible_hypatia_editor_suppresses_leave() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        // Focus moves to a split with plain text, but a.hyp stays visible.
        fx.workbench.focus(DocumentInfo::new("file:///b.txt", "plaintext"));
        editor_pass(&mut fx);
        assert!(fx.reconciler.is_current());
        assert_eq!(fx.workbench.active_theme().label, "Hypatia Dark");

        // Losing focus entirely also keeps the session while it is visible.
        fx.workbench.blur();
        editor_pass(&mut fx);
        assert!(fx.reconciler.is_current());

        fx.workbench.close("file:///a.hyp");
        editor_pass(&mut fx);
        assert!(!fx.reconciler.is_current());
    }

    #[test]
    fn leave_is_debounced_when_configured() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);
        fx.store
            .seed(keys::LEAVE_DEBOUNCE_MS, json!(50), ConfigTier::Global, None);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);
        fx.workbench.close("file:///a.hyp");

        let outcome = editor_pass(&mut fx);
        assert_eq!(outcome, PassOutcome::DebounceLeave(Duration::from_millis(50)));
        // Still current until the timer pass confirms the leave.
        assert!(fx.reconciler.is_current());
        assert_eq!(fx.workbench.active_theme().label, "Hypatia Dark");

        let outcome = fx.reconciler.run_pass(ReasonSet {
            leave_timer: true,
            ..Default::default()
        });
        assert_eq!(outcome, PassOutcome::Settled);
        assert!(!fx.reconciler.is_current());
        assert_eq!(fx.workbench.active_theme().label, "Default Dark");
    }

    #[test]
    fn semantic_override_applies_and_restores() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTOKENS, json!("off"), ConfigTier::Global, None);
        fx.store
            .seed(keys::SEMANTIC, json!("off"), ConfigTier::Global, None);
        fx.store.seed(
            keys::SEMANTIC_ENABLED,
            json!(true),
            ConfigTier::Workspace,
            None,
        );

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);
        assert_eq!(read(&fx, keys::SEMANTIC_ENABLED), Some(json!(false)));
        // The override went to the tier that already defined the key.
        let st = ConcernState::load(&fx.state, Concern::Semantic);
        assert_eq!(st.target, Some(ConfigTier::Workspace));
        assert_eq!(st.saved_value, Some(json!(true)));

        fx.workbench.close("file:///a.hyp");
        editor_pass(&mut fx);
        assert_eq!(read(&fx, keys::SEMANTIC_ENABLED), Some(json!(true)));
        assert_eq!(
            ConcernState::load(&fx.state, Concern::Semantic),
            ConcernState::default()
        );
    }

    #[test]
    fn semantic_inherit_restores_mid_session() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTOKENS, json!("off"), ConfigTier::Global, None);
        fx.store
            .seed(keys::SEMANTIC, json!("on"), ConfigTier::Global, None);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);
        assert_eq!(read(&fx, keys::SEMANTIC_ENABLED), Some(json!(true)));

        // Flipping to inherit restores without leaving the session.
        fx.store
            .seed(keys::SEMANTIC, json!("inherit"), ConfigTier::Global, None);
        fx.reconciler.run_pass(ReasonSet {
            config: true,
            ..Default::default()
        });
        assert!(read(&fx, keys::SEMANTIC_ENABLED).is_none());
        assert!(fx.reconciler.is_current());
    }

    #[test]
    fn rejected_write_rolls_back_state_and_spares_other_concerns() {
        let mut fx = fixture("Monokai", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);
        fx.store
            .seed(keys::AUTOTOKENS, json!("auto"), ConfigTier::Global, None);
        // The theme key lives at the workspace tier, and that tier rejects.
        fx.store
            .seed(keys::COLOR_THEME, json!("Monokai"), ConfigTier::Workspace, None);
        fx.store.reject_tier(ConfigTier::Workspace);

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        // Theme concern failed and rolled back entirely.
        assert_eq!(ConcernState::load(&fx.state, Concern::Theme), ConcernState::default());
        assert_eq!(fx.workbench.active_theme().label, "Monokai");
        // The overlay concern (global tier) still went through.
        let st = ConcernState::load(&fx.state, Concern::Tokens);
        assert!(st.applied);
        let live = TokenCustomization::from_value(read(&fx, keys::TOKEN_CUSTOMIZATIONS).as_ref());
        assert!(has_injected(&live));
    }

    #[test]
    fn orphaned_marker_rules_are_swept_on_restore() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTOKENS, json!("off"), ConfigTier::Global, None);
        // Simulate a crashed prior session: marker rules, no state record.
        fx.store.seed(
            keys::TOKEN_CUSTOMIZATIONS,
            json!({
                "textMateRules": [
                    {"name": "mine", "scope": "comment", "settings": {}},
                    {"name": "hypatia-auto:dark:0", "scope": "keyword", "settings": {}}
                ]
            }),
            ConfigTier::Global,
            None,
        );

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        let live = TokenCustomization::from_value(read(&fx, keys::TOKEN_CUSTOMIZATIONS).as_ref());
        assert!(!has_injected(&live));
        assert_eq!(live.text_mate_rules.len(), 1);
        assert_eq!(live.text_mate_rules[0].name.as_deref(), Some("mine"));
    }

    #[test]
    fn crashed_session_capture_is_the_clean_base() {
        let mut fx = fixture("Default Dark", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTOKENS, json!("dark"), ConfigTier::Global, None);
        fx.store.seed(
            keys::TOKEN_CUSTOMIZATIONS,
            json!({
                "textMateRules": [
                    {"name": "hypatia-auto:light:0", "scope": "keyword", "settings": {}}
                ]
            }),
            ConfigTier::Global,
            None,
        );

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);
        fx.workbench.close("file:///a.hyp");
        editor_pass(&mut fx);

        // The leftover rule was never treated as user data: after a full
        // session the key is gone.
        assert!(read(&fx, keys::TOKEN_CUSTOMIZATIONS).is_none());
    }

    #[test]
    fn switching_flag_is_held_during_writes_and_released_after() {
        let mut fx = fixture("Monokai", ThemeKind::Dark);
        fx.store
            .seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);

        let switching = fx.reconciler.switching.clone();
        let observed = Arc::new(AtomicBool::new(false));
        let observer = observed.clone();
        let flag = switching.clone();
        fx.store.subscribe(Arc::new(move |_| {
            if flag.load(Ordering::SeqCst) {
                observer.store(true, Ordering::SeqCst);
            }
        }));

        fx.workbench.focus(DocumentInfo::hypatia("file:///a.hyp"));
        editor_pass(&mut fx);

        assert!(observed.load(Ordering::SeqCst));
        assert!(!switching.load(Ordering::SeqCst));
    }

    #[test]
    fn switch_guard_releases_on_unwind_paths() {
        let flag = AtomicBool::new(false);
        {
            let _guard = SwitchGuard::acquire(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
