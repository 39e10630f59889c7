//! kplane schema: typed views over the few schema objects whose shape we rely on (XRDs, CRDs),
//! served-version selection, the versioned XRD client, the Provider→CRD index and the
//! kind→plural resolver.

#![forbid(unsafe_code)]

use std::cmp::Ordering;

use kplane_core::{plural_of, ObjectRef};

pub mod crd;
pub mod providers;
pub mod versioned;
pub mod xrd;

pub use crd::Crd;
pub use providers::{ProviderIndex, ProviderRule};
pub use versioned::XrdClient;
pub use xrd::{Xrd, XrdNames, XrdVersion};

/// Byte-wise ordering of version names in which a name ranks above every name it is a prefix of,
/// so a stable version beats its own pre-releases (`v1` > `v1beta1` > `v1alpha1`).
///
/// Not semantic versioning: `v10` sorts below `v2`.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let common = a.len().min(b.len());
    match a.as_bytes()[..common].cmp(&b.as_bytes()[..common]) {
        Ordering::Equal => b.len().cmp(&a.len()),
        other => other,
    }
}

/// Pick the version to query among `(name, served)` pairs: the greatest served name by
/// [`version_cmp`]. `None` when nothing is served.
pub fn pick_served_version<'a, I>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, bool)>,
{
    versions
        .into_iter()
        .filter(|(_, served)| *served)
        .map(|(name, _)| name)
        .max_by(|a, b| version_cmp(a, b))
        .map(str::to_string)
}

/// How a reference relates to the known XRDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefClass {
    Composite,
    Claim,
    Managed,
}

/// Resolve the REST plural for `kind` in `group`: a known claim kind, then a known composite
/// kind, then the naive heuristic.
pub fn plural_for(xrds: &[Xrd], kind: &str, group: &str) -> String {
    if let Some(claim) = xrds.iter().filter(|x| x.group == group).find_map(|x| x.claim.as_ref().filter(|c| c.kind == kind)) {
        return claim.plural.clone();
    }
    if let Some(x) = xrds.iter().find(|x| x.group == group && x.composite.kind == kind) {
        return x.composite.plural.clone();
    }
    plural_of(kind)
}

/// XRD whose composite kind is `reference`'s group+kind, also requiring the version to be declared
/// when the reference carries one.
pub fn composite_xrd<'a>(xrds: &'a [Xrd], reference: &ObjectRef) -> Option<&'a Xrd> {
    xrds.iter()
        .find(|x| !x.composite.kind.is_empty() && reference.same_group_kind(&x.group, &x.composite.kind) && x.declares_version(&reference.version))
}

/// XRD whose claim kind is `reference`'s group+kind.
pub fn claim_xrd<'a>(xrds: &'a [Xrd], reference: &ObjectRef) -> Option<&'a Xrd> {
    xrds.iter().find(|x| {
        x.claim.as_ref().is_some_and(|c| reference.same_group_kind(&x.group, &c.kind)) && x.declares_version(&reference.version)
    })
}

pub fn classify(xrds: &[Xrd], reference: &ObjectRef) -> RefClass {
    if composite_xrd(xrds, reference).is_some() {
        RefClass::Composite
    } else if claim_xrd(xrds, reference).is_some() {
        RefClass::Claim
    } else {
        RefClass::Managed
    }
}
