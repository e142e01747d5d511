use crate::competition::types::{
    AggregateStats, Exposure, PnlLeader, PriceSnapshot, RawTraderRecord, TraderState,
};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct TransformContext {
    pub now_ms: i64,
    pub accrual_active: bool,
    pub live_window_ms: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriorObservation {
    pub rank: Option<u32>,
    pub last_activity_ms: Option<i64>,
    pub last_update_ms: Option<i64>,
}

impl PriorObservation {
    pub fn from_state(state: &TraderState, rank: Option<u32>) -> Self {
        Self {
            rank,
            last_activity_ms: state.last_activity_ms,
            last_update_ms: Some(state.last_update_timestamp),
        }
    }
}

/// Sum of unrealized PnL. An exposure without a quote contributes zero.
pub fn calculate_total_pnl(exposures: &[Exposure], prices: &PriceSnapshot) -> f64 {
    exposures
        .iter()
        .filter_map(|exposure| {
            prices
                .price(&exposure.symbol)
                .map(|price| exposure.unrealized_pnl(price))
        })
        .filter(|contribution| contribution.is_finite())
        .sum()
}

fn pnl_percentage(total_pnl: f64, unused_balance: f64) -> f64 {
    if unused_balance > 0.0 {
        total_pnl / unused_balance * 100.0
    } else {
        0.0
    }
}

fn next_update_timestamp(now_ms: i64, previous: Option<i64>) -> i64 {
    match previous {
        Some(previous) => now_ms.max(previous.saturating_add(1)),
        None => now_ms,
    }
}

fn apply_pnl(state: &mut TraderState, total_pnl: f64) {
    state.total_pnl = total_pnl;
    state.total_equity = state.unused_balance + total_pnl;
    state.total_pnl_percentage = pnl_percentage(total_pnl, state.unused_balance);
}

fn accrued_pnl(exposures: &[Exposure], prices: &PriceSnapshot, accrual_active: bool) -> f64 {
    if accrual_active {
        calculate_total_pnl(exposures, prices)
    } else {
        0.0
    }
}

fn is_live(
    activity_ms: Option<i64>,
    prior_activity_ms: Option<i64>,
    context: &TransformContext,
) -> bool {
    let Some(activity_ms) = activity_ms else {
        return false;
    };
    let advanced = prior_activity_ms
        .map(|prior| activity_ms > prior)
        .unwrap_or(true);
    advanced && context.now_ms.saturating_sub(activity_ms) <= context.live_window_ms
}

pub fn transform_api_response_to_trader_state(
    raw: &RawTraderRecord,
    prices: &PriceSnapshot,
    input_index: usize,
    prior: PriorObservation,
    context: &TransformContext,
) -> TraderState {
    let mut state = TraderState {
        address: raw.address.clone(),
        display_name: raw.display_name.clone(),
        exposures: raw.exposures.clone(),
        unused_balance: raw.unused_balance,
        total_pnl: 0.0,
        total_equity: raw.unused_balance,
        total_pnl_percentage: 0.0,
        current_rank: None,
        previous_rank: prior.rank,
        rank_delta: 0,
        is_live: is_live(raw.last_activity_ms, prior.last_activity_ms, context),
        last_update_timestamp: next_update_timestamp(context.now_ms, prior.last_update_ms),
        last_activity_ms: raw.last_activity_ms,
        input_index,
    };
    apply_pnl(
        &mut state,
        accrued_pnl(&raw.exposures, prices, context.accrual_active),
    );
    state
}

pub fn reprice_trader_state(
    state: &TraderState,
    prices: &PriceSnapshot,
    context: &TransformContext,
) -> TraderState {
    let mut repriced = state.clone();
    apply_pnl(
        &mut repriced,
        accrued_pnl(&state.exposures, prices, context.accrual_active),
    );
    repriced.last_update_timestamp =
        next_update_timestamp(context.now_ms, Some(state.last_update_timestamp));
    repriced
}

fn by_equity_then_input_order(left: &TraderState, right: &TraderState) -> Ordering {
    right
        .total_equity
        .total_cmp(&left.total_equity)
        .then(left.input_index.cmp(&right.input_index))
}

/// Ranks by descending equity, ties resolved by input position. The result is
/// returned in rank order.
pub fn update_trader_rankings(
    mut traders: Vec<TraderState>,
    previous_ranks: &HashMap<String, u32>,
) -> Vec<TraderState> {
    traders.sort_by(by_equity_then_input_order);

    for (position, trader) in traders.iter_mut().enumerate() {
        let current_rank = u32::try_from(position + 1).unwrap_or(u32::MAX);
        let previous_rank = previous_ranks
            .get(&trader.address)
            .copied()
            .unwrap_or(current_rank);
        trader.current_rank = Some(current_rank);
        trader.previous_rank = Some(previous_rank);
        trader.rank_delta = i64::from(previous_rank) - i64::from(current_rank);
    }

    traders
}

pub fn rank_map(traders: &[TraderState]) -> HashMap<String, u32> {
    traders
        .iter()
        .filter_map(|trader| {
            trader
                .current_rank
                .map(|rank| (trader.address.clone(), rank))
        })
        .collect()
}

fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        len if len % 2 == 1 => sorted[len / 2],
        len => (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0,
    }
}

pub fn calculate_aggregate_stats(traders: &[TraderState]) -> AggregateStats {
    let participant_count = traders.len();
    if participant_count == 0 {
        return AggregateStats::default();
    }

    let mut stats = AggregateStats {
        participant_count,
        ..AggregateStats::default()
    };
    let mut pnls = Vec::with_capacity(participant_count);
    let mut best: Option<&TraderState> = None;
    let mut worst: Option<&TraderState> = None;

    for trader in traders {
        stats.total_pnl += trader.total_pnl;
        stats.total_equity += trader.total_equity;
        stats.total_volume += trader
            .exposures
            .iter()
            .map(Exposure::entry_notional)
            .sum::<f64>();

        if trader.total_pnl > 0.0 {
            stats.profitable_count += 1;
        } else if trader.total_pnl < 0.0 {
            stats.losing_count += 1;
        } else {
            stats.flat_count += 1;
        }

        if best.map_or(true, |current| trader.total_pnl > current.total_pnl) {
            best = Some(trader);
        }
        if worst.map_or(true, |current| trader.total_pnl < current.total_pnl) {
            worst = Some(trader);
        }
        pnls.push(trader.total_pnl);
    }

    pnls.sort_by(f64::total_cmp);
    stats.average_pnl = stats.total_pnl / participant_count as f64;
    stats.median_pnl = median(&pnls);
    stats.best = best.map(|trader| PnlLeader {
        address: trader.address.clone(),
        pnl: trader.total_pnl,
    });
    stats.worst = worst.map(|trader| PnlLeader {
        address: trader.address.clone(),
        pnl: trader.total_pnl,
    });
    stats
}
