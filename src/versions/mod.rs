//! Version resolution phase.
//!
//! Two detection passes over the unclaimed inventory: explicit filename
//! markers first, then name similarity within a directory. Similarity
//! candidates only become chains when the local model confirms the
//! relationship; explicit chains order deterministically unless their
//! markers disagree in kind.

pub mod patterns;
pub mod similarity;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::{ArchiveStrategy, Config};
use crate::db::{
    ChainStatus, Database, DocumentItem, NewChain, NewChainMember, VersionChain,
};
use crate::error::{PipelineError, Result};
use crate::llm::LocalLlm;
use patterns::{base_name, common_base_name, extract_marker, status_rank, MarkerKind, VersionMarker};

#[derive(Debug, Default)]
pub struct VersionOutcome {
    pub chains_created: usize,
    pub versions_linked: usize,
    pub explicit_groups: usize,
    pub similar_groups: usize,
    pub rejected_groups: usize,
}

struct Candidate {
    base_name: String,
    directory: String,
    extension: String,
    detection: Detection,
    /// Parallel to `members`.
    markers: Vec<Option<VersionMarker>>,
    members: Vec<DocumentItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detection {
    ExplicitMarker,
    NameSimilarity,
}

impl Detection {
    fn as_str(&self) -> &'static str {
        match self {
            Detection::ExplicitMarker => "explicit_marker",
            Detection::NameSimilarity => "name_similarity",
        }
    }

    fn confidence(&self) -> f64 {
        match self {
            Detection::ExplicitMarker => 0.95,
            Detection::NameSimilarity => 0.75,
        }
    }
}

struct Confirmation {
    current_index: Option<usize>,
    order: Option<Vec<usize>>,
    reasoning: String,
}

pub struct VersionResolver<'a> {
    config: &'a Config,
}

impl<'a> VersionResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        db: &mut Database,
        job_id: &str,
        llm: &LocalLlm,
        cancel: &Arc<AtomicBool>,
    ) -> Result<VersionOutcome> {
        let items = DocumentItem::list_unclaimed(db, job_id)?;

        let explicit = find_explicit_groups(&items);
        let claimed: std::collections::HashSet<i64> = explicit
            .iter()
            .flat_map(|c| c.members.iter().map(|m| m.id))
            .collect();
        let remaining: Vec<DocumentItem> = items
            .into_iter()
            .filter(|item| !claimed.contains(&item.id))
            .collect();
        let similar =
            find_similarity_groups(&remaining, self.config.versions.similarity_threshold);

        let mut outcome = VersionOutcome {
            explicit_groups: explicit.len(),
            similar_groups: similar.len(),
            ..VersionOutcome::default()
        };
        tracing::info!(
            job_id,
            explicit = explicit.len(),
            similar = similar.len(),
            "version candidates found"
        );

        for candidate in explicit.into_iter().chain(similar) {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::cancelled());
            }

            match self.resolve_candidate(db, job_id, candidate, llm, cancel) {
                Ok(Some(linked)) => {
                    outcome.chains_created += 1;
                    outcome.versions_linked += linked;
                }
                Ok(None) => outcome.rejected_groups += 1,
                Err(e) if e.is_terminal() || e.kind == crate::error::ErrorKind::Cancelled => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "version group failed, skipping");
                    outcome.rejected_groups += 1;
                }
            }
        }

        tracing::info!(
            job_id,
            chains = outcome.chains_created,
            linked = outcome.versions_linked,
            rejected = outcome.rejected_groups,
            "version resolution finished"
        );
        Ok(outcome)
    }

    fn resolve_candidate(
        &self,
        db: &mut Database,
        job_id: &str,
        candidate: Candidate,
        llm: &LocalLlm,
        cancel: &Arc<AtomicBool>,
    ) -> Result<Option<usize>> {
        let confirmation = match candidate.detection {
            Detection::NameSimilarity => {
                match confirm_with_llm(llm, &candidate, cancel) {
                    Ok(Some(confirmation)) => Some(confirmation),
                    // Unconfirmed or unavailable: similarity evidence alone
                    // is not enough to form a chain.
                    Ok(None) => return Ok(None),
                    Err(e) if e.kind == crate::error::ErrorKind::Cancelled => return Err(e),
                    Err(e) => {
                        tracing::debug!(base = %candidate.base_name, error = %e, "confirmation unavailable");
                        return Ok(None);
                    }
                }
            }
            Detection::ExplicitMarker if markers_disagree(&candidate.markers) => {
                match confirm_with_llm(llm, &candidate, cancel) {
                    Ok(confirmation) => confirmation,
                    Err(e) if e.kind == crate::error::ErrorKind::Cancelled => return Err(e),
                    // Explicit evidence stands on its own; order
                    // deterministically when the model cannot help.
                    Err(_) => None,
                }
            }
            Detection::ExplicitMarker => None,
        };

        let order = match confirmation.as_ref().and_then(|c| c.order.clone()) {
            Some(order) if is_permutation(&order, candidate.members.len()) => order,
            _ => deterministic_order(&candidate),
        };

        let current_position = confirmation
            .as_ref()
            .and_then(|c| c.current_index)
            .and_then(|original_index| order.iter().position(|&i| i == original_index))
            .unwrap_or(order.len() - 1);

        let linked = self.store_chain(db, job_id, &candidate, &order, current_position, confirmation)?;
        Ok(Some(linked))
    }

    fn store_chain(
        &self,
        db: &mut Database,
        job_id: &str,
        candidate: &Candidate,
        order: &[usize],
        current_position: usize,
        confirmation: Option<Confirmation>,
    ) -> Result<usize> {
        let strategy = self.config.versions.archive_strategy;
        let archive_path = archive_path_for(
            strategy,
            &candidate.directory,
            &candidate.base_name,
            &self.config.versions.folder_name,
        );

        let current_member = &candidate.members[order[current_position]];
        let confirmed = confirmation.is_some();
        let reasoning = confirmation.map(|c| c.reasoning);

        let mut members = Vec::with_capacity(order.len());
        for (position, &member_index) in order.iter().enumerate() {
            let item = &candidate.members[member_index];
            let marker = &candidate.markers[member_index];
            let version_number = (position + 1) as i64;
            let is_current = position == current_position;

            let version_label = marker
                .as_ref()
                .map(|m| m.marker.trim_matches(['_', ' ']).to_string())
                .unwrap_or_else(|| format!("v{version_number}"));
            let version_date = marker.as_ref().and_then(marker_date);

            let (proposed_name, proposed_path) = if is_current {
                (
                    format!("{}.{}", candidate.base_name, candidate.extension),
                    candidate.directory.clone(),
                )
            } else {
                let date = version_date
                    .clone()
                    .or_else(|| mtime_date(item))
                    .map(|d| format!("_{d}"))
                    .unwrap_or_default();
                (
                    format!(
                        "{}_v{}{}.{}",
                        candidate.base_name, version_number, date, candidate.extension
                    ),
                    archive_path.clone(),
                )
            };

            members.push(NewChainMember {
                document_id: item.id,
                version_number,
                version_label: Some(version_label),
                version_date,
                is_current,
                status: if is_current {
                    ChainStatus::Active
                } else {
                    ChainStatus::Superseded
                },
                proposed_version_name: proposed_name,
                proposed_version_path: proposed_path,
            });
        }

        VersionChain::store(
            db,
            job_id,
            &NewChain {
                chain_name: candidate.base_name.clone(),
                base_path: candidate.directory.clone(),
                current_document_id: current_member.id,
                current_version_number: (current_position + 1) as i64,
                detection_method: candidate.detection.as_str(),
                detection_confidence: candidate.detection.confidence(),
                llm_reasoning: reasoning,
                version_order_confirmed: confirmed,
                archive_strategy: strategy.as_str(),
                archive_path,
            },
            &members,
        )?;

        Ok(members.len())
    }
}

fn stem(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

fn find_explicit_groups(items: &[DocumentItem]) -> Vec<Candidate> {
    let mut groups: HashMap<(String, String, String), Vec<(DocumentItem, VersionMarker)>> =
        HashMap::new();

    for item in items {
        let (base, marker) = extract_marker(stem(&item.current_name));
        let Some(marker) = marker else { continue };
        if base.is_empty() {
            continue;
        }
        let key = (
            base.to_lowercase(),
            item.current_path.clone(),
            item.extension.clone(),
        );
        groups.entry(key).or_default().push((item.clone(), marker));
    }

    let mut candidates: Vec<Candidate> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|((_, directory, extension), members)| {
            let stems: Vec<String> = members
                .iter()
                .map(|(item, _)| stem(&item.current_name).to_string())
                .collect();
            let base = base_name(&stems[0]);
            let (items, markers): (Vec<_>, Vec<_>) = members.into_iter().unzip();
            Candidate {
                base_name: if base.is_empty() { "document".to_string() } else { base },
                directory,
                extension,
                detection: Detection::ExplicitMarker,
                markers: markers.into_iter().map(Some).collect(),
                members: items,
            }
        })
        .collect();
    candidates.sort_by(|a, b| {
        (&a.directory, &a.base_name, &a.extension).cmp(&(&b.directory, &b.base_name, &b.extension))
    });
    candidates
}

fn find_similarity_groups(items: &[DocumentItem], threshold: f64) -> Vec<Candidate> {
    let mut by_dir_ext: HashMap<(String, String), Vec<&DocumentItem>> = HashMap::new();
    for item in items {
        by_dir_ext
            .entry((item.current_path.clone(), item.extension.clone()))
            .or_default()
            .push(item);
    }

    let mut candidates = Vec::new();
    for ((directory, extension), group) in by_dir_ext {
        if group.len() < 2 {
            continue;
        }

        let mut taken = vec![false; group.len()];
        for i in 0..group.len() {
            if taken[i] {
                continue;
            }
            let mut bucket = vec![i];
            let stem_i = stem(&group[i].current_name).to_lowercase();

            for j in (i + 1)..group.len() {
                if taken[j] {
                    continue;
                }
                // Identical content is a duplicate, not a version.
                if group[i].content_hash == group[j].content_hash {
                    continue;
                }
                let stem_j = stem(&group[j].current_name).to_lowercase();
                if similarity::name_similarity(&stem_i, &stem_j) >= threshold {
                    bucket.push(j);
                    taken[j] = true;
                }
            }

            if bucket.len() >= 2 {
                taken[i] = true;
                let stems: Vec<&str> = bucket
                    .iter()
                    .map(|&index| stem(&group[index].current_name))
                    .collect();
                let base = common_base_name(&stems);
                candidates.push(Candidate {
                    base_name: base,
                    directory: directory.clone(),
                    extension: extension.clone(),
                    detection: Detection::NameSimilarity,
                    markers: bucket
                        .iter()
                        .map(|&index| extract_marker(stem(&group[index].current_name)).1)
                        .collect(),
                    members: bucket.iter().map(|&index| group[index].clone()).collect(),
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        (&a.directory, &a.base_name, &a.extension).cmp(&(&b.directory, &b.base_name, &b.extension))
    });
    candidates
}

/// Markers of mixed kinds cannot be ordered against each other reliably.
fn markers_disagree(markers: &[Option<VersionMarker>]) -> bool {
    let mut kinds: Vec<MarkerKind> = markers
        .iter()
        .filter_map(|m| m.as_ref().map(|m| m.kind))
        .collect();
    kinds.dedup();
    kinds.len() > 1
}

/// Sort indices oldest to newest: numeric versions, then dates, then
/// status rank, then modification time.
fn deterministic_order(candidate: &Candidate) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidate.members.len()).collect();
    order.sort_by_key(|&index| sort_key(&candidate.members[index], &candidate.markers[index]));
    order
}

fn sort_key(item: &DocumentItem, marker: &Option<VersionMarker>) -> (u8, i64, String) {
    let mtime = item.source_mtime.clone().unwrap_or_default();
    match marker {
        Some(m) => match m.kind {
            MarkerKind::VersionNumber | MarkerKind::RevisionNumber | MarkerKind::CopyNumber => {
                match m.value.parse::<i64>() {
                    Ok(n) => (1, n, mtime),
                    Err(_) => (4, 0, mtime),
                }
            }
            MarkerKind::Date | MarkerKind::DateCompact => match marker_date(m) {
                Some(date) => (2, 0, date),
                None => (4, 0, mtime),
            },
            MarkerKind::Status => (3, status_rank(&m.value), mtime),
        },
        None => (4, 0, mtime),
    }
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &index in order {
        if index >= len || seen[index] {
            return false;
        }
        seen[index] = true;
    }
    true
}

/// ISO date carried by a date marker.
fn marker_date(marker: &VersionMarker) -> Option<String> {
    match marker.kind {
        MarkerKind::Date => NaiveDate::parse_from_str(&marker.value, "%Y-%m-%d")
            .ok()
            .map(|d| d.to_string()),
        MarkerKind::DateCompact => NaiveDate::parse_from_str(&marker.value, "%Y%m%d")
            .ok()
            .map(|d| d.to_string()),
        _ => None,
    }
}

fn mtime_date(item: &DocumentItem) -> Option<String> {
    item.source_mtime
        .as_deref()
        .and_then(|m| m.get(..10))
        .map(|d| d.to_string())
}

fn archive_path_for(
    strategy: ArchiveStrategy,
    directory: &str,
    base: &str,
    folder_name: &str,
) -> String {
    match strategy {
        ArchiveStrategy::Subfolder => {
            if directory.is_empty() {
                format!("{folder_name}/{base}")
            } else {
                format!("{directory}/{folder_name}/{base}")
            }
        }
        ArchiveStrategy::Inline => directory.to_string(),
        ArchiveStrategy::SeparateArchive => format!("Archive/Versions/{base}"),
    }
}

fn confirm_prompt(candidate: &Candidate) -> String {
    let mut listing = String::new();
    for (index, member) in candidate.members.iter().enumerate() {
        let summary = member
            .content_summary
            .as_deref()
            .unwrap_or("no summary")
            .chars()
            .take(200)
            .collect::<String>();
        listing.push_str(&format!(
            "[{index}] {}\n    size: {} bytes\n    modified: {}\n    summary: {summary}\n",
            member.current_name,
            member.file_size,
            member.source_mtime.as_deref().unwrap_or("unknown"),
        ));
    }

    format!(
        "Analyze these files to determine if they are versions of the same document:\n\n\
         {listing}\n\
         Questions:\n\
         1. Are these different versions of the same document? (yes/no)\n\
         2. If yes, which file is the CURRENT (most recent) version? (index 0-{})\n\
         3. In what order were they created? (all indices, oldest to newest)\n\n\
         Respond in this exact format:\n\
         CONFIRMED: yes/no\n\
         CURRENT_INDEX: <number>\n\
         ORDER: <comma-separated indices, oldest first>\n\
         REASONING: <your explanation>",
        candidate.members.len() - 1
    )
}

/// Line-protocol confirmation. `Ok(None)` means the model said no.
fn confirm_with_llm(
    llm: &LocalLlm,
    candidate: &Candidate,
    cancel: &Arc<AtomicBool>,
) -> Result<Option<Confirmation>> {
    let system = "You are a document version analyzer. Determine if files are versions \
                  of the same document based on names, dates, and content summaries.";
    let response = llm.summarize(&confirm_prompt(candidate), Some(system), cancel)?;

    let mut confirmed = false;
    let mut current_index = None;
    let mut order = None;
    let mut reasoning = response.trim().to_string();

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("CONFIRMED:") {
            confirmed = rest.trim().to_lowercase().starts_with("yes");
        } else if let Some(rest) = line.strip_prefix("CURRENT_INDEX:") {
            current_index = rest.trim().parse::<usize>().ok();
        } else if let Some(rest) = line.strip_prefix("ORDER:") {
            let indices: Vec<usize> = rest
                .split(',')
                .filter_map(|part| part.trim().parse::<usize>().ok())
                .collect();
            if !indices.is_empty() {
                order = Some(indices);
            }
        } else if let Some(rest) = line.strip_prefix("REASONING:") {
            reasoning = rest.trim().to_string();
        }
    }

    if !confirmed {
        return Ok(None);
    }

    Ok(Some(Confirmation {
        current_index: current_index.filter(|&i| i < candidate.members.len()),
        order,
        reasoning,
    }))
}
