// Lineup optimizer: formation- and budget-constrained team selection.
//
// Candidates are ranked once per position. Every formation (count tuple) the
// rules allow is evaluated as "top-k of each position" first. When that
// selection breaks the budget cap, the formation falls back to an exact
// knapsack over (count, cost), or to branch and bound when the cost axis is
// too fine for a table. The best tuple wins and captaincy goes to the two
// highest-ranked members.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::player::{FeatureRow, Position, ScoredRow};

// ---------------------------------------------------------------------------
// Lineup rules
// ---------------------------------------------------------------------------

/// Inclusive count range for one position. Deserializes from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub min: usize,
    pub max: usize,
}

impl SlotRange {
    pub const fn new(min: usize, max: usize) -> Self {
        SlotRange { min, max }
    }

    pub fn contains(&self, n: usize) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct RulesViolation {
    pub field: String,
    pub message: String,
}

/// Per-position count ranges plus the fixed lineup size.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LineupRules {
    pub size: usize,
    pub goalkeeper: SlotRange,
    pub defender: SlotRange,
    pub midfielder: SlotRange,
    pub forward: SlotRange,
}

impl Default for LineupRules {
    fn default() -> Self {
        LineupRules {
            size: 11,
            goalkeeper: SlotRange::new(1, 1),
            defender: SlotRange::new(3, 5),
            midfielder: SlotRange::new(2, 5),
            forward: SlotRange::new(1, 3),
        }
    }
}

impl LineupRules {
    pub fn range(&self, pos: Position) -> SlotRange {
        match pos {
            Position::Goalkeeper => self.goalkeeper,
            Position::Defender => self.defender,
            Position::Midfielder => self.midfielder,
            Position::Forward => self.forward,
        }
    }

    pub fn validate(&self) -> Result<(), RulesViolation> {
        for pos in Position::ALL {
            let range = self.range(pos);
            if range.min > range.max {
                return Err(RulesViolation {
                    field: pos.display_str().to_lowercase(),
                    message: format!("min {} exceeds max {}", range.min, range.max),
                });
            }
        }
        let min_total: usize = Position::ALL.iter().map(|&p| self.range(p).min).sum();
        let max_total: usize = Position::ALL.iter().map(|&p| self.range(p).max).sum();
        // Captain and vice must be two distinct players.
        if self.size < 2 || self.size < min_total || self.size > max_total {
            return Err(RulesViolation {
                field: "size".into(),
                message: format!(
                    "must be at least 2 and between the summed minimums ({min_total}) \
                     and maximums ({max_total}), got {}",
                    self.size
                ),
            });
        }
        Ok(())
    }

    /// Every count tuple within the slot ranges that sums to `size` and does
    /// not exceed the available candidates, in ascending lexicographic order.
    pub fn formations(&self, available: [usize; 4]) -> Vec<Formation> {
        let cap = |pos: Position| self.range(pos).max.min(available[pos.index()]);
        let mut out = Vec::new();
        for g in self.goalkeeper.min..=cap(Position::Goalkeeper) {
            for d in self.defender.min..=cap(Position::Defender) {
                for m in self.midfielder.min..=cap(Position::Midfielder) {
                    let used = g + d + m;
                    if used > self.size {
                        continue;
                    }
                    let f = self.size - used;
                    if self.forward.contains(f) && f <= available[Position::Forward.index()] {
                        out.push(Formation([g, d, m, f]));
                    }
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Formation
// ---------------------------------------------------------------------------

/// Player count per position, indexed by `Position::index()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Formation(pub [usize; 4]);

impl Formation {
    pub fn count(&self, pos: Position) -> usize {
        self.0[pos.index()]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

impl fmt::Display for Formation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [g, d, m, fw] = self.0;
        write!(f, "{g}-{d}-{m}-{fw}")
    }
}

impl Serialize for Formation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("not enough {position} candidates: need {required}, have {available}")]
    InsufficientCandidates {
        position: Position,
        required: usize,
        available: usize,
    },

    #[error(
        "no lineup fits the budget cap of {budget_cap}: cheapest formation {formation} \
         costs {cost} ({overage} over)"
    )]
    NoFeasibleLineup {
        formation: Formation,
        cost: u64,
        budget_cap: u32,
        overage: u64,
    },

    #[error("invalid lineup rules: {0}")]
    InvalidRules(#[from] RulesViolation),

    #[error("budget search for formation {formation} gave up after {nodes} nodes")]
    SearchLimit { formation: Formation, nodes: u64 },
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Captain,
    Vice,
}

/// A selected player.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub row: FeatureRow,
    pub expected_points: f64,
    pub role: Option<Role>,
}

/// Serialized shape of one team member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamEntry {
    pub position: Position,
    pub web_name: String,
    pub team_name: String,
    pub opponent_team_name: String,
    pub was_home: bool,
    pub gameweek: u32,
    pub expected_points: f64,
    pub cost: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// A valid lineup. Only `select` constructs one, so every `Team` satisfies
/// the rules, the budget cap and the captaincy invariants it was built with.
///
/// Picks are in captaincy order: captain, vice, then the rest by rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    picks: Vec<Pick>,
    formation: Formation,
    total_cost: u32,
    total_expected_points: f64,
    budget_cap: u32,
}

impl Team {
    pub fn picks(&self) -> &[Pick] {
        &self.picks
    }

    pub fn len(&self) -> usize {
        self.picks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    pub fn formation(&self) -> Formation {
        self.formation
    }

    pub fn total_cost(&self) -> u32 {
        self.total_cost
    }

    pub fn total_expected_points(&self) -> f64 {
        self.total_expected_points
    }

    pub fn budget_cap(&self) -> u32 {
        self.budget_cap
    }

    pub fn captain(&self) -> &Pick {
        &self.picks[0]
    }

    pub fn vice_captain(&self) -> &Pick {
        &self.picks[1]
    }

    pub fn entries(&self) -> Vec<TeamEntry> {
        self.picks
            .iter()
            .map(|p| TeamEntry {
                position: p.row.position,
                web_name: p.row.web_name.clone(),
                team_name: p.row.team_name.clone(),
                opponent_team_name: p.row.opponent_team_name.clone(),
                was_home: p.row.was_home,
                gameweek: p.row.gameweek,
                expected_points: p.expected_points,
                cost: p.row.cost,
                role: p.role,
            })
            .collect()
    }
}

/// A team serializes as its ordered list of entries.
impl Serialize for Team {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.entries();
        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for entry in &entries {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    row: &'a FeatureRow,
    points: f64,
}

/// Points descending, then cost ascending, then player id ascending.
fn rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.points
        .total_cmp(&a.points)
        .then(a.row.cost.cmp(&b.row.cost))
        .then(a.row.player_id.cmp(&b.row.player_id))
}

/// Ranked, deduplicated candidates partitioned by position.
fn partition(rows: &[ScoredRow]) -> [Vec<Candidate<'_>>; 4] {
    let mut all: Vec<Candidate<'_>> = Vec::with_capacity(rows.len());
    for scored in rows {
        match scored.expected_points() {
            Some(points) if points.is_finite() => all.push(Candidate {
                row: &scored.row,
                points,
            }),
            Some(_) => warn!(
                "skipping player {} ({}): non-finite expected points",
                scored.row.player_id, scored.row.web_name
            ),
            None => debug!(
                "skipping player {} ({}): scoring failed",
                scored.row.player_id, scored.row.web_name
            ),
        }
    }
    all.sort_by(rank);

    let mut seen = HashSet::new();
    let mut partitions: [Vec<Candidate<'_>>; 4] = Default::default();
    for candidate in all {
        if !seen.insert(candidate.row.player_id) {
            debug!(
                "dropping lower-ranked duplicate row for player {}",
                candidate.row.player_id
            );
            continue;
        }
        partitions[candidate.row.position.index()].push(candidate);
    }
    partitions
}

/// Running totals over each ranked partition, so a formation's top-k sums
/// are lookups. `cheapest` holds the same totals over costs sorted ascending.
struct PrefixSums {
    points: [Vec<f64>; 4],
    cost: [Vec<u64>; 4],
    cheapest: [Vec<u64>; 4],
}

impl PrefixSums {
    fn new(partitions: &[Vec<Candidate<'_>>; 4]) -> Self {
        let mut points: [Vec<f64>; 4] = Default::default();
        let mut cost: [Vec<u64>; 4] = Default::default();
        let mut cheapest: [Vec<u64>; 4] = Default::default();
        for (i, partition) in partitions.iter().enumerate() {
            points[i] = running(partition.iter().map(|c| c.points), 0.0);
            cost[i] = running(partition.iter().map(|c| u64::from(c.row.cost)), 0);

            let mut sorted: Vec<u64> = partition.iter().map(|c| u64::from(c.row.cost)).collect();
            sorted.sort_unstable();
            cheapest[i] = running(sorted.into_iter(), 0);
        }
        PrefixSums {
            points,
            cost,
            cheapest,
        }
    }

    fn top(&self, formation: Formation) -> (f64, u64) {
        formation
            .0
            .iter()
            .enumerate()
            .fold((0.0, 0), |(p, c), (i, &k)| (p + self.points[i][k], c + self.cost[i][k]))
    }

    fn cheapest(&self, formation: Formation) -> u64 {
        formation
            .0
            .iter()
            .enumerate()
            .map(|(i, &k)| self.cheapest[i][k])
            .sum()
    }
}

fn running<T: Copy + std::ops::Add<Output = T>>(values: impl Iterator<Item = T>, zero: T) -> Vec<T> {
    let mut out = vec![zero];
    for v in values {
        let last = out[out.len() - 1];
        out.push(last + v);
    }
    out
}

/// Exact best subsets of one ranked partition, indexed by member count and
/// total cost (0/1 knapsack with a cardinality dimension).
///
/// Candidates are added in rank order and only strictly better sums replace
/// a cell, so among equal-point subsets the higher-ranked players win.
struct PositionTable {
    width: usize,
    /// `best[j][c]`: max points from exactly `j` players costing exactly `c`.
    best: Vec<Vec<f64>>,
    /// `take[i][j * width + c]`: candidate `i` improved cell `(j, c)`.
    take: Vec<Vec<bool>>,
    costs: Vec<usize>,
}

impl PositionTable {
    /// `unit` divides every candidate cost; cells index cost in units.
    fn build(candidates: &[Candidate<'_>], max_count: usize, unit: u64, width: usize) -> Self {
        let mut best = vec![vec![f64::NEG_INFINITY; width]; max_count + 1];
        best[0][0] = 0.0;
        let mut take = Vec::with_capacity(candidates.len());
        let mut costs = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let cost = (u64::from(candidate.row.cost) / unit) as usize;
            let mut flags = vec![false; (max_count + 1) * width];
            if cost < width {
                for j in (1..=max_count).rev() {
                    for total in (cost..width).rev() {
                        let prev = best[j - 1][total - cost];
                        if prev == f64::NEG_INFINITY {
                            continue;
                        }
                        let with = prev + candidate.points;
                        if with > best[j][total] {
                            best[j][total] = with;
                            flags[j * width + total] = true;
                        }
                    }
                }
            }
            take.push(flags);
            costs.push(cost);
        }

        PositionTable {
            width,
            best,
            take,
            costs,
        }
    }

    fn row(&self, count: usize) -> &[f64] {
        &self.best[count]
    }

    /// Partition indices of the subset behind cell `(count, cost)`.
    fn members(&self, count: usize, cost: usize) -> Vec<usize> {
        let (mut j, mut c) = (count, cost);
        let mut out = Vec::with_capacity(count);
        for i in (0..self.take.len()).rev() {
            if j == 0 {
                break;
            }
            if self.take[i][j * self.width + c] {
                out.push(i);
                j -= 1;
                c -= self.costs[i];
            }
        }
        out.reverse();
        out
    }
}

/// Max-plus convolution of two cost-indexed tables. `split[c]` records the
/// cost taken from `next` in the best combination totalling `c`.
fn convolve(acc: &[f64], next: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let width = acc.len();
    let mut out = vec![f64::NEG_INFINITY; width];
    let mut split = vec![0; width];
    for (a, &pa) in acc.iter().enumerate() {
        if pa == f64::NEG_INFINITY {
            continue;
        }
        for (b, &pb) in next[..width - a].iter().enumerate() {
            if pb == f64::NEG_INFINITY {
                continue;
            }
            let total = pa + pb;
            if total > out[a + b] {
                out[a + b] = total;
                split[a + b] = b;
            }
        }
    }
    (out, split)
}

/// A formation's chosen members as indices into each ranked partition.
#[derive(Debug, Clone)]
struct Candidacy {
    formation: Formation,
    points: f64,
    cost: u64,
    members: [Vec<usize>; 4],
}

/// Best budget-feasible selection for one formation via the knapsack tables.
fn knapsack(formation: Formation, tables: &[PositionTable; 4], unit: u64) -> Option<Candidacy> {
    let mut acc = tables[0].row(formation.0[0]).to_vec();
    let mut splits = Vec::with_capacity(3);
    for (table, &k) in tables[1..].iter().zip(&formation.0[1..]) {
        let (next, split) = convolve(&acc, table.row(k));
        acc = next;
        splits.push(split);
    }

    // Lowest cost wins among equal points.
    let mut best: Option<(usize, f64)> = None;
    for (cost, &points) in acc.iter().enumerate() {
        if points > best.map_or(f64::NEG_INFINITY, |(_, p)| p) {
            best = Some((cost, points));
        }
    }
    let (cost, points) = best?;

    let mut per_position = [0usize; 4];
    let mut rest = cost;
    for (i, split) in splits.iter().enumerate().rev() {
        per_position[i + 1] = split[rest];
        rest -= split[rest];
    }
    per_position[0] = rest;

    let members = std::array::from_fn(|i| tables[i].members(formation.0[i], per_position[i]));
    Some(Candidacy {
        formation,
        points,
        cost: cost as u64 * unit,
        members,
    })
}

/// Table cells (take flags plus best sums) above which the binding-budget
/// search switches from the knapsack to branch and bound.
const KNAPSACK_CELL_LIMIT: usize = 1 << 25;

/// Nodes one formation may visit under branch and bound.
const SEARCH_NODE_LIMIT: u64 = 20_000_000;

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Exact search used for formations whose top-k selection breaks the cap.
enum Search {
    Knapsack { tables: [PositionTable; 4], unit: u64 },
    Branch,
}

impl Search {
    /// Size the cost axis before allocating anything. Costs are divided by
    /// their gcd and the axis stops at the cap or at the dearest reachable
    /// total, whichever is lower.
    fn plan(
        partitions: &[Vec<Candidate<'_>>; 4],
        max_counts: [usize; 4],
        cap: u64,
        cell_limit: usize,
    ) -> Self {
        let unit = partitions
            .iter()
            .flatten()
            .map(|c| u64::from(c.row.cost))
            .fold(0, gcd)
            .max(1);
        let reachable: u64 = partitions
            .iter()
            .zip(max_counts)
            .map(|(partition, k)| {
                let mut costs: Vec<u64> = partition.iter().map(|c| u64::from(c.row.cost)).collect();
                costs.sort_unstable_by(|a, b| b.cmp(a));
                costs.iter().take(k).sum::<u64>()
            })
            .sum();
        let width = usize::try_from((cap / unit).min(reachable / unit))
            .map_or(usize::MAX, |w| w.saturating_add(1));

        let cells = partitions
            .iter()
            .zip(max_counts)
            .fold(0usize, |acc, (partition, k)| {
                let rows = (partition.len() + 1).saturating_mul(k + 1);
                acc.saturating_add(rows.saturating_mul(width))
            });
        if cells > cell_limit {
            warn!("knapsack would need {cells} cells at cost unit {unit}, using branch and bound");
            return Search::Branch;
        }

        debug!("knapsack tables: cost unit {unit}, width {width}, {cells} cells");
        Search::Knapsack {
            tables: std::array::from_fn(|i| {
                PositionTable::build(&partitions[i], max_counts[i], unit, width)
            }),
            unit,
        }
    }
}

/// Depth-first search over one formation's subsets, including candidates in
/// rank order first. Branches are cut when even the best remaining picks
/// cannot beat the incumbent or the cheapest remaining picks break the cap.
struct BranchSearch<'s, 'r> {
    partitions: &'s [Vec<Candidate<'r>>; 4],
    sums: &'s PrefixSums,
    formation: Formation,
    cap: u64,
    /// Top-k points of the positions from index `p` on.
    rest_points: [f64; 5],
    /// Cheapest-k cost of the positions from index `p` on.
    rest_cost: [u64; 5],
    chosen: [Vec<usize>; 4],
    best: Option<Candidacy>,
    nodes: u64,
}

impl BranchSearch<'_, '_> {
    fn visit(&mut self, p: usize, i: usize, points: f64, cost: u64) -> Result<(), SelectionError> {
        self.nodes += 1;
        if self.nodes > SEARCH_NODE_LIMIT {
            return Err(SelectionError::SearchLimit {
                formation: self.formation,
                nodes: SEARCH_NODE_LIMIT,
            });
        }

        if p == 4 {
            let better = self.best.as_ref().map_or(true, |b| {
                points > b.points || (points == b.points && cost < b.cost)
            });
            if better {
                self.best = Some(Candidacy {
                    formation: self.formation,
                    points,
                    cost,
                    members: self.chosen.clone(),
                });
            }
            return Ok(());
        }

        let need = self.formation.0[p] - self.chosen[p].len();
        if need == 0 {
            return self.visit(p + 1, 0, points, cost);
        }
        let partition = &self.partitions[p];
        if partition.len() - i < need {
            return Ok(());
        }

        let top = &self.sums.points[p];
        let upper = points + (top[i + need] - top[i]) + self.rest_points[p + 1];
        let lower = cost + self.sums.cheapest[p][need] + self.rest_cost[p + 1];
        if lower > self.cap {
            return Ok(());
        }
        if self.best.as_ref().is_some_and(|b| upper + 1e-9 < b.points) {
            return Ok(());
        }

        let candidate = partition[i];
        let with_cost = cost + u64::from(candidate.row.cost);
        if with_cost <= self.cap {
            self.chosen[p].push(i);
            self.visit(p, i + 1, points + candidate.points, with_cost)?;
            self.chosen[p].pop();
        }
        self.visit(p, i + 1, points, cost)
    }
}

fn branch_and_bound(
    formation: Formation,
    partitions: &[Vec<Candidate<'_>>; 4],
    sums: &PrefixSums,
    cap: u64,
) -> Result<Option<Candidacy>, SelectionError> {
    let mut rest_points = [0.0; 5];
    let mut rest_cost = [0; 5];
    for p in (0..4).rev() {
        let k = formation.0[p];
        rest_points[p] = rest_points[p + 1] + sums.points[p][k];
        rest_cost[p] = rest_cost[p + 1] + sums.cheapest[p][k];
    }

    let mut search = BranchSearch {
        partitions,
        sums,
        formation,
        cap,
        rest_points,
        rest_cost,
        chosen: Default::default(),
        best: None,
        nodes: 0,
    };
    search.visit(0, 0, 0.0, 0)?;
    debug!("formation {formation}: branch and bound visited {} nodes", search.nodes);
    Ok(search.best)
}

/// Report the first position that cannot supply its share when no count
/// tuple fits the available candidates.
fn shortfall(rules: &LineupRules, available: [usize; 4]) -> SelectionError {
    let caps: Vec<usize> = Position::ALL
        .iter()
        .map(|&p| rules.range(p).max.min(available[p.index()]))
        .collect();
    let total_caps: usize = caps.iter().sum();

    for pos in Position::ALL {
        let range = rules.range(pos);
        let have = available[pos.index()];
        if have < range.max {
            let others = total_caps - caps[pos.index()];
            let required = rules.size.saturating_sub(others).max(range.min).min(range.max);
            return SelectionError::InsufficientCandidates {
                position: pos,
                required,
                available: have,
            };
        }
    }

    // Unreachable with validated rules: every position at its max covers size.
    SelectionError::InsufficientCandidates {
        position: Position::Goalkeeper,
        required: rules.goalkeeper.min,
        available: available[0],
    }
}

/// Select the budget-feasible lineup with the highest total expected points.
///
/// Failed rows are ignored. Ties on points go to the cheaper lineup, then to
/// the earliest formation in enumeration order. Deterministic for fixed
/// inputs.
pub fn select(
    rows: &[ScoredRow],
    budget_cap: u32,
    rules: &LineupRules,
) -> Result<Team, SelectionError> {
    select_within(rows, budget_cap, rules, KNAPSACK_CELL_LIMIT)
}

fn select_within(
    rows: &[ScoredRow],
    budget_cap: u32,
    rules: &LineupRules,
    cell_limit: usize,
) -> Result<Team, SelectionError> {
    rules.validate()?;

    let partitions = partition(rows);
    let available: [usize; 4] = std::array::from_fn(|i| partitions[i].len());

    for pos in Position::ALL {
        let required = rules.range(pos).min;
        if available[pos.index()] < required {
            return Err(SelectionError::InsufficientCandidates {
                position: pos,
                required,
                available: available[pos.index()],
            });
        }
    }

    let formations = rules.formations(available);
    if formations.is_empty() {
        return Err(shortfall(rules, available));
    }

    let cap = u64::from(budget_cap);
    let sums = PrefixSums::new(&partitions);
    let max_counts: [usize; 4] =
        std::array::from_fn(|i| rules.range(Position::ALL[i]).max.min(available[i]));
    let mut search: Option<Search> = None;
    let mut best: Option<Candidacy> = None;
    let mut cheapest: Option<(Formation, u64)> = None;

    for formation in formations {
        let floor = sums.cheapest(formation);
        if cheapest.map_or(true, |(_, c)| floor < c) {
            cheapest = Some((formation, floor));
        }
        if floor > cap {
            debug!("formation {formation}: cheapest selection costs {floor}, over cap");
            continue;
        }

        let (points, cost) = sums.top(formation);
        let candidacy = if cost <= cap {
            Candidacy {
                formation,
                points,
                cost,
                members: std::array::from_fn(|i| (0..formation.0[i]).collect()),
            }
        } else {
            // The budget binds: search every subset of this formation.
            let search = search
                .get_or_insert_with(|| Search::plan(&partitions, max_counts, cap, cell_limit));
            let found = match search {
                Search::Knapsack { tables, unit } => knapsack(formation, tables, *unit),
                Search::Branch => branch_and_bound(formation, &partitions, &sums, cap)?,
            };
            match found {
                Some(c) => c,
                None => continue,
            }
        };
        debug!(
            "formation {formation}: {:.3} points, cost {}",
            candidacy.points, candidacy.cost
        );

        let better = match &best {
            None => true,
            Some(b) => {
                candidacy.points > b.points
                    || (candidacy.points == b.points && candidacy.cost < b.cost)
            }
        };
        if better {
            best = Some(candidacy);
        }
    }

    let Some(chosen) = best else {
        // `formations` was non-empty, so a cheapest candidate exists.
        let (formation, cost) = cheapest.unwrap_or((Formation([0; 4]), 0));
        return Err(SelectionError::NoFeasibleLineup {
            formation,
            cost,
            budget_cap,
            overage: cost.saturating_sub(cap),
        });
    };

    let mut members: Vec<Candidate<'_>> = chosen
        .members
        .iter()
        .enumerate()
        .flat_map(|(i, indices)| indices.iter().map(move |&j| (i, j)))
        .map(|(i, j)| partitions[i][j])
        .collect();
    members.sort_by(rank);

    let picks: Vec<Pick> = members
        .iter()
        .enumerate()
        .map(|(i, c)| Pick {
            row: c.row.clone(),
            expected_points: c.points,
            role: match i {
                0 => Some(Role::Captain),
                1 => Some(Role::Vice),
                _ => None,
            },
        })
        .collect();
    let total_expected_points = picks.iter().map(|p| p.expected_points).sum();
    let total_cost: u32 = picks.iter().map(|p| p.row.cost).sum();

    info!(
        "Selected formation {}: {} players, cost {}/{budget_cap}, captain {}, vice {}",
        chosen.formation,
        picks.len(),
        total_cost,
        picks[0].row.web_name,
        picks[1].row.web_name
    );

    Ok(Team {
        picks,
        formation: chosen.formation,
        total_cost,
        total_expected_points,
        budget_cap,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
