// shims.rs — Taming shims for ambient capabilities.
//
// Each shim rewrites exactly one capability of a realm that is still
// `Building`. Shims run before the bootstrap program and before pruning, so
// whatever they leave behind is then subject to the policy like everything
// else.

use tracing::debug;
use warden_policy::ShimKind;

use crate::error::ShimError;
use crate::natives::{Builtin, LEGACY_GROUPS};
use crate::realm::Realm;
use crate::value::{ObjectId, Value};

/// A rewrite of one ambient capability into a confined form.
pub trait TamingShim: Send + Sync {
    fn kind(&self) -> ShimKind;

    /// Rewrite the capability in place. Called at most once per realm.
    fn apply(&self, realm: &mut Realm) -> Result<(), ShimError>;
}

/// The shim implementing `kind`.
pub fn shim_for(kind: ShimKind) -> Box<dyn TamingShim> {
    match kind {
        ShimKind::Clock => Box::new(ClockShim),
        ShimKind::Random => Box::new(RandomShim),
        ShimKind::Locale => Box::new(LocaleShim),
        ShimKind::Diagnostic => Box::new(DiagnosticShim),
        ShimKind::Pattern => Box::new(PatternShim),
    }
}

/// The global object a shim operates on, or `Unsupported`.
fn capability(realm: &Realm, kind: ShimKind) -> Result<ObjectId, ShimError> {
    realm
        .member(realm.global(), kind.capability())
        .ok_or(ShimError::Unsupported {
            shim: kind,
            capability: kind.capability(),
        })
}

/// `Date.now()` yields NaN instead of reading the host clock.
pub struct ClockShim;

impl TamingShim for ClockShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Clock
    }

    fn apply(&self, realm: &mut Realm) -> Result<(), ShimError> {
        let date = capability(realm, self.kind())?;
        let now = realm.builtin_function(Builtin::TamedDateNow);
        realm.put(date, "now", Value::Object(now));
        Ok(())
    }
}

/// `Math.random()` yields NaN instead of drawing host entropy.
pub struct RandomShim;

impl TamingShim for RandomShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Random
    }

    fn apply(&self, realm: &mut Realm) -> Result<(), ShimError> {
        let math = capability(realm, self.kind())?;
        let random = realm.builtin_function(Builtin::TamedRandom);
        realm.put(math, "random", Value::Object(random));
        Ok(())
    }
}

/// Removes `Intl` and the locale-sensitive `Object.prototype.toLocaleString`.
pub struct LocaleShim;

impl TamingShim for LocaleShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Locale
    }

    fn apply(&self, realm: &mut Realm) -> Result<(), ShimError> {
        capability(realm, self.kind())?;
        let global = realm.global();
        realm.remove(global, self.kind().capability());
        let object_prototype = realm.context.intrinsics.object_prototype;
        if realm.remove(object_prototype, "toLocaleString") {
            debug!("removed Object.prototype.toLocaleString");
        }
        Ok(())
    }
}

/// Removes the stack-trace hooks and stops error values capturing stacks.
pub struct DiagnosticShim;

pub(crate) const DIAGNOSTIC_MEMBERS: [&str; 3] =
    ["captureStackTrace", "stackTraceLimit", "prepareStackTrace"];

impl TamingShim for DiagnosticShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Diagnostic
    }

    fn apply(&self, realm: &mut Realm) -> Result<(), ShimError> {
        let error = capability(realm, self.kind())?;
        for member in DIAGNOSTIC_MEMBERS {
            realm.remove(error, member);
        }
        realm.set_stack_capture(false);
        Ok(())
    }
}

/// Removes the legacy static match-state accessors from `RegExp`.
pub struct PatternShim;

impl TamingShim for PatternShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Pattern
    }

    fn apply(&self, realm: &mut Realm) -> Result<(), ShimError> {
        let regexp = capability(realm, self.kind())?;
        realm.remove(regexp, "lastMatch");
        realm.remove(regexp, "input");
        for n in 1..=LEGACY_GROUPS {
            realm.remove(regexp, &format!("${}", n));
        }
        Ok(())
    }
}
