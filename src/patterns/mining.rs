//! The four mining passes. Every function here is pure: it reads its input
//! and returns what survived the retention thresholds.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::metrics::classify::ExampleRing;
use crate::types::{Impact, InvocationRecord};

use super::{AntiPattern, DiscoveredPattern, PatternKind, PatternOutcomes};

/// Minimum occurrences for any pattern to be kept.
pub const MIN_SUPPORT: u64 = 3;
/// Minimum success fraction for any pattern to be kept.
pub const MIN_CONFIDENCE: f64 = 0.7;
pub const MIN_WINDOW: usize = 2;
pub const MAX_WINDOW: usize = 4;
/// Sessions that must show a repeated failure before it becomes an anti-pattern.
pub const MIN_ANTI_PATTERN_OCCURRENCES: u64 = 3;
/// Failures of one tool within one session that count as "repeated".
pub const REPEATED_FAILURE_THRESHOLD: usize = 2;

pub const SUCCESS_PATTERN_MIN_TOTAL: u64 = 5;
pub const SUCCESS_PATTERN_MIN_RATE: f64 = 0.95;
pub const SUCCESS_PATTERN_MAX_LATENCY_MS: f64 = 1000.0;

const SEQUENCE_JOIN: &str = " -> ";
const COMBINATION_JOIN: &str = " + ";

/// Group invocations by session id, each session ordered by timestamp.
///
/// Records without a session are left out. Ties keep input order.
pub fn group_by_session(invocations: &[InvocationRecord]) -> BTreeMap<&str, Vec<&InvocationRecord>> {
    let mut sessions: BTreeMap<&str, Vec<&InvocationRecord>> = BTreeMap::new();
    for inv in invocations {
        if let Some(sid) = inv.session_id() {
            sessions.entry(sid).or_default().push(inv);
        }
    }
    for calls in sessions.values_mut() {
        calls.sort_by_key(|r| r.timestamp);
    }
    sessions
}

// ---------------------------------------------------------------------------
// Accumulation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tally {
    tools: Vec<String>,
    /// Occurrences (sessions, or tools for success patterns).
    support: u64,
    successes: u64,
    /// Raw observations.
    instances: u64,
    latency_sum: u128,
    latency_n: u64,
    last_seen: u64,
}

impl Tally {
    fn add_latency<'a>(&mut self, calls: impl IntoIterator<Item = &'a InvocationRecord>) {
        for c in calls {
            self.latency_sum += c.duration_ms as u128;
            self.latency_n += 1;
            self.last_seen = self.last_seen.max(c.timestamp);
        }
    }

    fn confidence(&self) -> f64 {
        if self.support == 0 {
            0.0
        } else {
            self.successes as f64 / self.support as f64
        }
    }

    fn avg_latency(&self) -> f64 {
        if self.latency_n == 0 {
            0.0
        } else {
            self.latency_sum as f64 / self.latency_n as f64
        }
    }

    fn retained(&self) -> bool {
        self.support >= MIN_SUPPORT && self.confidence() >= MIN_CONFIDENCE
    }

    fn into_pattern(self, kind: PatternKind, key: &str, now: u64) -> DiscoveredPattern {
        let confidence = self.confidence();
        DiscoveredPattern {
            id: DiscoveredPattern::make_id(kind, key),
            kind,
            confidence,
            support: self.support,
            frequency: self.instances,
            outcomes: PatternOutcomes::derive(confidence, self.avg_latency(), self.support),
            discovered: now,
            last_seen: self.last_seen,
            tools: self.tools,
        }
    }
}

fn finish(tallies: BTreeMap<String, Tally>, kind: PatternKind, now: u64) -> Vec<DiscoveredPattern> {
    tallies
        .into_iter()
        .filter(|(_, t)| t.retained())
        .map(|(key, t)| t.into_pattern(kind, &key, now))
        .collect()
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// Contiguous windows of 2..=4 calls inside each session.
///
/// Support counts sessions containing the window. A session's occurrence is
/// successful when at least one instance of the window had every call
/// succeed. `frequency` is the raw instance count across all sessions.
pub fn mine_sequences(
    sessions: &BTreeMap<&str, Vec<&InvocationRecord>>,
    now: u64,
) -> Vec<DiscoveredPattern> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for calls in sessions.values() {
        // key -> (instances, any fully successful instance)
        let mut seen: HashMap<String, (u64, bool)> = HashMap::new();
        for size in MIN_WINDOW..=MAX_WINDOW {
            if calls.len() < size {
                break;
            }
            for window in calls.windows(size) {
                let names: Vec<String> = window.iter().map(|c| c.tool_name.clone()).collect();
                let key = names.join(SEQUENCE_JOIN);
                let ok = window.iter().all(|c| c.success);

                let tally = tallies.entry(key.clone()).or_default();
                if tally.tools.is_empty() {
                    tally.tools = names;
                }
                tally.instances += 1;
                tally.add_latency(window.iter().copied());

                let slot = seen.entry(key).or_insert((0, false));
                slot.0 += 1;
                slot.1 |= ok;
            }
        }
        for (key, (_, any_ok)) in seen {
            if let Some(tally) = tallies.get_mut(&key) {
                tally.support += 1;
                if any_ok {
                    tally.successes += 1;
                }
            }
        }
    }

    finish(tallies, PatternKind::Sequence, now)
}

/// The sorted set of distinct tools each session used. Sessions touching
/// fewer than two distinct tools contribute nothing.
pub fn mine_combinations(
    sessions: &BTreeMap<&str, Vec<&InvocationRecord>>,
    now: u64,
) -> Vec<DiscoveredPattern> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for calls in sessions.values() {
        let distinct: BTreeSet<&str> = calls.iter().map(|c| c.tool_name.as_str()).collect();
        if distinct.len() < 2 {
            continue;
        }
        let tools: Vec<String> = distinct.into_iter().map(str::to_string).collect();
        let key = tools.join(COMBINATION_JOIN);

        let tally = tallies.entry(key).or_default();
        if tally.tools.is_empty() {
            tally.tools = tools;
        }
        tally.support += 1;
        tally.instances += 1;
        if calls.iter().all(|c| c.success) {
            tally.successes += 1;
        }
        tally.add_latency(calls.iter().copied());
    }

    finish(tallies, PatternKind::Combination, now)
}

/// Tools with at least five calls, a success rate above 95% and a mean
/// successful latency under one second. Session membership is irrelevant.
pub fn mine_success_patterns(invocations: &[InvocationRecord], now: u64) -> Vec<DiscoveredPattern> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for inv in invocations {
        let tally = tallies.entry(inv.tool_name.clone()).or_default();
        if tally.tools.is_empty() {
            tally.tools = vec![inv.tool_name.clone()];
        }
        tally.support += 1;
        tally.instances += 1;
        tally.last_seen = tally.last_seen.max(inv.timestamp);
        if inv.success {
            tally.successes += 1;
            tally.latency_sum += inv.duration_ms as u128;
            tally.latency_n += 1;
        }
    }

    tallies
        .into_iter()
        .filter(|(_, t)| {
            t.support >= SUCCESS_PATTERN_MIN_TOTAL
                && t.confidence() > SUCCESS_PATTERN_MIN_RATE
                && t.avg_latency() < SUCCESS_PATTERN_MAX_LATENCY_MS
        })
        .map(|(key, t)| t.into_pattern(PatternKind::SuccessPattern, &key, now))
        .collect()
}

/// Anti-pattern impact from the number of sessions showing it.
pub fn anti_pattern_impact(occurrences: u64) -> Impact {
    match occurrences {
        n if n >= 20 => Impact::Critical,
        n if n >= 10 => Impact::High,
        n if n >= 5 => Impact::Medium,
        _ => Impact::Low,
    }
}

/// Tools failing at least twice within one session, in three or more sessions.
pub fn mine_anti_patterns(sessions: &BTreeMap<&str, Vec<&InvocationRecord>>) -> Vec<AntiPattern> {
    struct Acc {
        occurrences: u64,
        symptoms: Vec<String>,
        examples: ExampleRing,
        last_seen: u64,
    }

    let mut by_tool: BTreeMap<String, Acc> = BTreeMap::new();

    for (sid, calls) in sessions {
        let mut failures: BTreeMap<&str, Vec<&InvocationRecord>> = BTreeMap::new();
        for c in calls.iter().copied().filter(|c| !c.success) {
            failures.entry(c.tool_name.as_str()).or_default().push(c);
        }
        for (tool, failed) in failures {
            if failed.len() < REPEATED_FAILURE_THRESHOLD {
                continue;
            }
            let acc = by_tool.entry(tool.to_string()).or_insert_with(|| Acc {
                occurrences: 0,
                symptoms: Vec::new(),
                examples: ExampleRing::new(),
                last_seen: 0,
            });
            acc.occurrences += 1;
            acc.examples.push(*sid);
            for f in failed {
                acc.last_seen = acc.last_seen.max(f.timestamp);
                let symptom = f.error.as_deref().unwrap_or("unknown error");
                if !acc.symptoms.iter().any(|s| s == symptom) {
                    acc.symptoms.push(symptom.to_string());
                }
            }
        }
    }

    by_tool
        .into_iter()
        .filter(|(_, acc)| acc.occurrences >= MIN_ANTI_PATTERN_OCCURRENCES)
        .map(|(tool, acc)| AntiPattern {
            id: format!("repeated-failure-{tool}"),
            name: format!("Repeated failure: {tool}"),
            description: format!(
                "{tool} failed {REPEATED_FAILURE_THRESHOLD} or more times within a single session in {} sessions",
                acc.occurrences
            ),
            occurrences: acc.occurrences,
            impact: anti_pattern_impact(acc.occurrences),
            remediation: format!(
                "Validate inputs before calling {tool} and retry transient errors with backoff. \
                 Configure a fallback tool if {tool} keeps failing within a session."
            ),
            tools: vec![tool],
            symptoms: acc.symptoms,
            examples: acc.examples,
            last_seen: acc.last_seen,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(session: &str, tool: &str, ts: u64, ok: bool) -> InvocationRecord {
        let rec = if ok {
            InvocationRecord::success(tool, 100)
        } else {
            InvocationRecord::failure(tool, 100, format!("{tool}: request timeout"))
        };
        rec.with_session(session).with_timestamp(ts)
    }

    fn session(sid: &str, start: u64, steps: &[(&str, bool)]) -> Vec<InvocationRecord> {
        steps
            .iter()
            .enumerate()
            .map(|(i, (tool, ok))| call(sid, tool, start + i as u64, *ok))
            .collect()
    }

    fn find<'a>(v: &'a [DiscoveredPattern], id: &str) -> Option<&'a DiscoveredPattern> {
        v.iter().find(|p| p.id == id)
    }

    // ===== group_by_session =====

    #[test]
    fn test_group_orders_by_timestamp_and_skips_sessionless() {
        let calls = vec![
            call("s", "B", 20, true),
            call("s", "A", 10, true),
            InvocationRecord::success("C", 1).with_timestamp(5),
        ];
        let groups = group_by_session(&calls);
        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = groups["s"].iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    // ===== sequences =====

    #[test]
    fn test_sequence_support_counts_sessions() {
        let mut calls = Vec::new();
        for s in 0..4u64 {
            calls.extend(session(&format!("s{s}"), s * 100, &[("A", true), ("B", true), ("C", true)]));
        }
        let groups = group_by_session(&calls);
        let found = mine_sequences(&groups, 0);

        let ab = find(&found, "sequence:A -> B").unwrap();
        assert_eq!(ab.support, 4);
        assert_eq!(ab.confidence, 1.0);
        assert_eq!(ab.tools, vec!["A", "B"]);
        assert!(find(&found, "sequence:B -> C").is_some());
        assert!(find(&found, "sequence:A -> B -> C").is_some());
    }

    #[test]
    fn test_sequence_below_min_support_is_dropped() {
        let mut calls = Vec::new();
        for s in 0..2u64 {
            calls.extend(session(&format!("s{s}"), s * 100, &[("A", true), ("B", true)]));
        }
        assert!(mine_sequences(&group_by_session(&calls), 0).is_empty());
    }

    #[test]
    fn test_sequence_low_confidence_is_dropped() {
        let mut calls = Vec::new();
        calls.extend(session("s0", 0, &[("A", true), ("B", true)]));
        for s in 1..4u64 {
            calls.extend(session(&format!("s{s}"), s * 100, &[("A", true), ("B", false)]));
        }
        assert!(find(&mine_sequences(&group_by_session(&calls), 0), "sequence:A -> B").is_none());
    }

    #[test]
    fn test_sequence_frequency_counts_instances() {
        let mut calls = Vec::new();
        for s in 0..3u64 {
            calls.extend(session(
                &format!("s{s}"),
                s * 100,
                &[("A", true), ("B", true), ("A", true), ("B", true)],
            ));
        }
        let found = mine_sequences(&group_by_session(&calls), 0);
        let ab = find(&found, "sequence:A -> B").unwrap();
        assert_eq!(ab.support, 3);
        assert_eq!(ab.frequency, 6);
    }

    #[test]
    fn test_sequence_window_longer_than_session_skipped() {
        let calls = session("s", 0, &[("A", true), ("B", true)]);
        let groups = group_by_session(&calls);
        // Only a single 2-window exists; nothing of size 3 or 4.
        let found = mine_sequences(&groups, 0);
        assert!(found.iter().all(|p| p.tools.len() <= 2));
    }

    // ===== combinations =====

    #[test]
    fn test_combination_is_order_independent() {
        let mut calls = Vec::new();
        calls.extend(session("s0", 0, &[("B", true), ("A", true)]));
        calls.extend(session("s1", 100, &[("A", true), ("B", true)]));
        calls.extend(session("s2", 200, &[("A", true), ("B", true), ("A", true)]));
        let found = mine_combinations(&group_by_session(&calls), 0);
        let combo = find(&found, "combination:A + B").unwrap();
        assert_eq!(combo.support, 3);
        assert_eq!(combo.tools, vec!["A", "B"]);
    }

    #[test]
    fn test_single_tool_session_is_not_a_combination() {
        let mut calls = Vec::new();
        for s in 0..5u64 {
            calls.extend(session(&format!("s{s}"), s * 100, &[("A", true), ("A", true)]));
        }
        assert!(mine_combinations(&group_by_session(&calls), 0).is_empty());
    }

    // ===== success patterns =====

    #[test]
    fn test_success_pattern_requires_fast_reliable_tool() {
        let mut calls: Vec<InvocationRecord> =
            (0..6).map(|i| InvocationRecord::success("fast", 50).with_timestamp(i)).collect();
        calls.extend((0..6).map(|i| InvocationRecord::success("slow", 2_000).with_timestamp(i)));
        calls.extend((0..4).map(|i| InvocationRecord::success("rare", 10).with_timestamp(i)));
        let found = mine_success_patterns(&calls, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "success:fast");
        assert_eq!(found[0].support, 6);
        assert_eq!(found[0].outcomes.avg_latency, 50.0);
    }

    #[test]
    fn test_success_pattern_rate_must_exceed_threshold() {
        // 19/20 = 0.95 exactly, not above.
        let mut calls: Vec<InvocationRecord> =
            (0..19).map(|_| InvocationRecord::success("t", 10)).collect();
        calls.push(InvocationRecord::failure("t", 10, "boom"));
        assert!(mine_success_patterns(&calls, 0).is_empty());
    }

    // ===== anti-patterns =====

    #[test]
    fn test_anti_pattern_needs_repeats_in_three_sessions() {
        let mut calls = Vec::new();
        for s in 0..3u64 {
            calls.extend(session(
                &format!("s{s}"),
                s * 100,
                &[("A", true), ("B", true), ("A", false), ("B", false), ("A", false), ("B", false)],
            ));
        }
        let mut found = mine_anti_patterns(&group_by_session(&calls));
        found.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "repeated-failure-A");
        assert_eq!(found[1].id, "repeated-failure-B");
        assert_eq!(found[0].tools, vec!["A"]);
        assert_eq!(found[0].occurrences, 3);
        assert_eq!(found[0].impact, Impact::Low);
        assert_eq!(found[0].symptoms, vec!["A: request timeout".to_string()]);
        assert_eq!(found[0].examples.len(), 3);
    }

    #[test]
    fn test_single_failure_per_session_is_not_anti_pattern() {
        let mut calls = Vec::new();
        for s in 0..5u64 {
            calls.extend(session(&format!("s{s}"), s * 100, &[("A", false), ("A", true)]));
        }
        assert!(mine_anti_patterns(&group_by_session(&calls)).is_empty());
    }

    #[test]
    fn test_anti_pattern_impact_levels() {
        assert_eq!(anti_pattern_impact(3), Impact::Low);
        assert_eq!(anti_pattern_impact(5), Impact::Medium);
        assert_eq!(anti_pattern_impact(10), Impact::High);
        assert_eq!(anti_pattern_impact(20), Impact::Critical);
    }
}
