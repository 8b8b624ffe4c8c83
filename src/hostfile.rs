use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{ProvisionError, Result};
use crate::scheduler::{MemberPhase, MemberStatus};

/// File name of the peer file inside the job's working directory.
pub const HOSTFILE_NAME: &str = "hostfile";

pub fn hostfile_path(working_dir: &Path) -> PathBuf {
    working_dir.join(HOSTFILE_NAME)
}

/// Build the peer file body: one `<address> slots=<n>` line per member, in
/// the order the members were reported.
pub fn render_hostfile(members: &[MemberStatus], slots_per_node: u32) -> Result<String> {
    let mut body = String::new();
    for member in members {
        let address = usable_address(member)?;
        body.push_str(&format!("{} slots={}\n", address, slots_per_node));
    }
    Ok(body)
}

/// Write the peer file for `members` to `output_path`.
///
/// The content goes to a temporary file in the same directory which is then
/// renamed over `output_path`, so readers see either the old file or the
/// complete new one. The directory is synced after the rename so the new
/// entry survives a crash.
pub fn write_hostfile(
    members: &[MemberStatus],
    slots_per_node: u32,
    output_path: &Path,
) -> Result<()> {
    let body = render_hostfile(members, slots_per_node)?;

    let dir = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_err = |source: std::io::Error| ProvisionError::PeerFileWrite {
        path: output_path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(body.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(output_path).map_err(|e| write_err(e.error))?;
    sync_dir(dir).map_err(write_err)?;

    tracing::info!(
        path = %output_path.display(),
        members = members.len(),
        slots_per_node,
        "Hostfile published"
    );
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

// Directories cannot be opened as files here; the rename is all we get.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn usable_address(member: &MemberStatus) -> Result<&str> {
    let missing = || ProvisionError::MissingAddress {
        member: member.name.clone(),
        phase: member.phase,
    };
    if member.phase != MemberPhase::Running {
        return Err(missing());
    }
    match member.address.as_deref().map(str::trim) {
        Some(addr) if !addr.is_empty() && !addr.contains(char::is_whitespace) => Ok(addr),
        _ => Err(missing()),
    }
}
