//! `tether classes`: print the member tables of the native classes.

use crate::commands::serve::build_bridge;
use crate::config::HostConfig;
use tether_sdk::{Access, ClassMetadata, Locator, MemberKind};

pub fn execute() -> anyhow::Result<()> {
    let bridge = build_bridge(&HostConfig::default())?;
    for meta in bridge.registry().classes() {
        print!("{}", render(&meta));
    }
    Ok(())
}

fn render(meta: &ClassMetadata) -> String {
    let mut out = format!(
        "{} ({}, {} bytes)\n",
        meta.name(),
        meta.type_name(),
        meta.size()
    );
    for member in meta.members() {
        let line = match (member.kind(), member.locator()) {
            (MemberKind::Data(kind), Locator::Field { offset, size }) => {
                let access = match member.access() {
                    Access::ReadOnly => "ro",
                    Access::ReadWrite => "rw",
                };
                format!("  {:<12} {:?} @{}+{} {}\n", member.name(), kind, offset, size, access)
            }
            _ => format!("  {:<12} method\n", member.name()),
        };
        out.push_str(&line);
    }
    out
}
