use analysis_core::{AlertCategory, AlertEvent, Break20, BoxState, IndicatorRow, Stage, Trend};

/// Band around EMA_5 that separates IN from OUT, as a fraction of EMA_5
pub const BOX_THRESHOLD: f64 = 0.04;

pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_MIDLINE: f64 = 50.0;

/// UP when EMA_5 > EMA_10 > SMA_20, DOWN when strictly reversed, NEUTRAL otherwise
pub fn classify_trend(ema_5: f64, ema_10: f64, sma_20: Option<f64>) -> Trend {
    let Some(sma_20) = sma_20 else {
        return Trend::Neutral;
    };

    if ema_5 > ema_10 && ema_10 > sma_20 {
        Trend::Up
    } else if ema_5 < ema_10 && ema_10 < sma_20 {
        Trend::Down
    } else {
        Trend::Neutral
    }
}

/// Band membership of the close relative to EMA_5.
///
/// Both comparisons are strict, so a close exactly on the band edge is
/// `Unclassified`.
pub fn classify_box(close: f64, ema_5: f64) -> BoxState {
    let distance = (close - ema_5).abs();
    let threshold = BOX_THRESHOLD * ema_5;

    if distance > threshold {
        BoxState::Out
    } else if distance < threshold {
        BoxState::In
    } else {
        BoxState::Unclassified
    }
}

/// Close crossing SMA_20 between two consecutive rows
pub fn classify_break_20(
    prev_close: f64,
    prev_sma_20: Option<f64>,
    close: f64,
    sma_20: Option<f64>,
) -> Break20 {
    let (Some(prev_sma), Some(sma)) = (prev_sma_20, sma_20) else {
        return Break20::None;
    };

    if close > sma && prev_close < prev_sma {
        Break20::CrossUp
    } else if close < sma && prev_close > prev_sma {
        Break20::CrossDown
    } else {
        Break20::None
    }
}

/// Inputs of the stage rules for one row
#[derive(Debug, Clone, Copy)]
pub struct StageInputs {
    pub close: f64,
    pub sma_20: Option<f64>,
    pub rsi: Option<f64>,
    pub trend: Trend,
    pub box_state: BoxState,
    pub break_20: Option<Break20>,
}

/// Composite stage. Rules are evaluated top to bottom and the first match wins:
///
/// 1. CROSS_UP, or OUT above SMA_20 without a down trend -> 2
/// 2. CROSS_DOWN, or OUT below SMA_20 without an up trend -> 4
/// 3. IN with RSI below 50 -> 1
/// 4. IN with RSI above 50 -> 3
/// 5. otherwise UNKNOWN
pub fn classify_stage(inputs: &StageInputs) -> Stage {
    let above_sma = inputs.sma_20.is_some_and(|sma| inputs.close > sma);
    let below_sma = inputs.sma_20.is_some_and(|sma| inputs.close < sma);
    let is_out = inputs.box_state == BoxState::Out;
    let is_in = inputs.box_state == BoxState::In;

    if inputs.break_20 == Some(Break20::CrossUp) || (is_out && above_sma && inputs.trend != Trend::Down) {
        Stage::Two
    } else if inputs.break_20 == Some(Break20::CrossDown)
        || (is_out && below_sma && inputs.trend != Trend::Up)
    {
        Stage::Four
    } else if is_in && inputs.rsi.is_some_and(|rsi| rsi < RSI_MIDLINE) {
        Stage::One
    } else if is_in && inputs.rsi.is_some_and(|rsi| rsi > RSI_MIDLINE) {
        Stage::Three
    } else {
        Stage::Unknown
    }
}

/// Compare the last two rows of a ticker and collect every alert that applies.
///
/// The previous close is compared with the previous SMA_20, today's open and
/// close with today's SMA_20. Events are appended in a fixed order: breakout
/// family, breakdown family, RSI crosses, ex-dividend.
pub fn detect_events(ticker: &str, prev: &IndicatorRow, cur: &IndicatorRow) -> Vec<AlertEvent> {
    let mut events = Vec::new();

    if let (Some(prev_sma), Some(sma)) = (prev.sma_20, cur.sma_20) {
        let prev_above = prev.close > prev_sma;
        let prev_below = prev.close < prev_sma;
        let open_above = cur.open > sma;
        let open_below = cur.open < sma;
        let close_above = cur.close > sma;
        let close_below = cur.close < sma;

        if prev_above && open_below && close_above {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::FakeBreakout,
                format!("{}: fake breakout, opened below MA_20 ({:.2}) and recovered to close at {:.2}", ticker, sma, cur.close),
            ));
        }
        if prev_below && open_above && close_above {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::Breakout,
                format!("{}: clean breakout, opened and closed above MA_20 ({:.2}) at {:.2}", ticker, sma, cur.close),
            ));
        }
        if prev_below && open_below && close_above {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::Breakout,
                format!("{}: breakout through MA_20 ({:.2}), closed at {:.2}", ticker, sma, cur.close),
            ));
        }

        if prev_below && open_above && close_below {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::FakeBreakdown,
                format!("{}: fake breakdown, opened above MA_20 ({:.2}) and fell back to close at {:.2}", ticker, sma, cur.close),
            ));
        }
        if prev_above && open_below && close_below {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::Breakdown,
                format!("{}: clean breakdown, opened and closed below MA_20 ({:.2}) at {:.2}", ticker, sma, cur.close),
            ));
        }
        if prev_above && open_above && close_below {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::Breakdown,
                format!("{}: breakdown through MA_20 ({:.2}), closed at {:.2}", ticker, sma, cur.close),
            ));
        }
    }

    if let (Some(prev_rsi), Some(rsi)) = (prev.rsi, cur.rsi) {
        if prev_rsi >= RSI_OVERSOLD && rsi < RSI_OVERSOLD {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::RsiCross30,
                format!("{}: RSI crossed below 30 ({:.2} -> {:.2})", ticker, prev_rsi, rsi),
            ));
        }
        if prev_rsi <= RSI_OVERBOUGHT && rsi > RSI_OVERBOUGHT {
            events.push(AlertEvent::new(
                ticker,
                AlertCategory::RsiCross70,
                format!("{}: RSI crossed above 70 ({:.2} -> {:.2})", ticker, prev_rsi, rsi),
            ));
        }
    }

    if cur.dividend != 0.0 {
        events.push(AlertEvent::new(
            ticker,
            AlertCategory::ExDividend,
            format!("{}: ex-dividend date {}, dividend {:.4}", ticker, cur.date, cur.dividend),
        ));
    }

    events
}
