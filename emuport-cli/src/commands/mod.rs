pub mod allocate;
pub mod completion;
pub mod launch;
pub mod list;
pub mod release;
pub mod summary;
pub mod supervise;
pub mod sweep;

/// Print the remediation hint of a port selection failure, then return it.
/// Other errors (storage, configuration) pass through unchanged.
pub(crate) fn allocation_failed(e: emuport::EmuportError) -> anyhow::Error {
    if !e.is_allocation_failure() {
        return anyhow::Error::new(e);
    }
    if let Some(hint) = e.remediation() {
        eprintln!("{}", hint);
    }
    anyhow::Error::new(e).context("allocation failed")
}
