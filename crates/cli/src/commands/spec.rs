use clap::Subcommand;
use relay_core::spec::{
    InMemorySpecStore, ServiceSpec, SpecKeeper, SpecProposal, SpecProposalHandler,
};
use serde::Deserialize;
use std::sync::Arc;

use super::utils::{print_error, print_info, print_success, CliResult};

#[derive(Subcommand)]
pub enum SpecCommands {
    /// Apply a file of spec proposals in order and list the resulting specs
    Apply {
        /// JSON file holding an array of proposals
        #[arg(short, long)]
        file: String,

        /// Highest compute units an API may be priced at
        #[arg(long, default_value = "10000")]
        max_cu: u64,

        /// Keep applying after a rejected proposal
        #[arg(long)]
        keep_going: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ProposalKind {
    Add,
    Modify,
}

/// On-disk form of a proposal: `{"kind": "add", "specs": [...]}`.
#[derive(Debug, Deserialize)]
struct ProposalEntry {
    kind: ProposalKind,
    specs: Vec<ServiceSpec>,
}

impl From<ProposalEntry> for SpecProposal {
    fn from(entry: ProposalEntry) -> Self {
        match entry.kind {
            ProposalKind::Add => Self::Add(entry.specs),
            ProposalKind::Modify => Self::Modify(entry.specs),
        }
    }
}

pub fn handle_spec_command(command: SpecCommands) -> CliResult<()> {
    match command {
        SpecCommands::Apply { file, max_cu, keep_going } => {
            let content = std::fs::read_to_string(&file)?;
            let store = Arc::new(InMemorySpecStore::new(max_cu));
            apply_proposals(&content, &store, keep_going)?;

            print_info(&format!("{} specs stored:", store.len()));
            for index in store.indexes() {
                if let Some(spec) = store.get_spec(&index) {
                    println!(
                        "  {index} ({}): {} apis, {}",
                        spec.name,
                        spec.apis.len(),
                        if spec.enabled { "enabled" } else { "disabled" }
                    );
                }
            }
            Ok(())
        }
    }
}

/// Parses `content` and applies each proposal to `store`. Returns how many passed.
fn apply_proposals(
    content: &str,
    store: &Arc<InMemorySpecStore>,
    keep_going: bool,
) -> CliResult<usize> {
    let entries: Vec<ProposalEntry> = serde_json::from_str(content)?;
    let handler = SpecProposalHandler::new(Arc::clone(store) as Arc<dyn SpecKeeper>);

    let mut applied = 0;
    for (position, entry) in entries.into_iter().enumerate() {
        let proposal = SpecProposal::from(entry);
        match handler.handle(&proposal) {
            Ok(()) => {
                applied += 1;
                print_success(&format!(
                    "Proposal #{position} ({}) applied: {} specs",
                    proposal.as_str(),
                    proposal.specs().len()
                ));
            }
            Err(e) if keep_going => {
                print_error(&format!("Proposal #{position} ({}) rejected: {e}", proposal.as_str()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(applied)
}
