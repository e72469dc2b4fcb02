use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ModifyOutcome, TradingClient};
use crate::backfill::CandleAgent;
use crate::db::{CandleStore, PositionStore};
use crate::execution::bracket::{bracket_prices, order_quantity};
use crate::models::{Coin, FuturesSide, PlanType, PositionDirection, PositionState};
use crate::strategy::{StreakStrategy, Strategy};
use crate::Result;

/// Trading parameters of one cycle
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub trading_base_url: String,
    pub coin: Coin,
    /// USDT value of each market order
    pub order_notional: Decimal,
    pub size_precision: u32,
    /// Pause between chained exchange calls
    pub call_pause: Duration,
    pub page_limit: usize,
    pub claim_ttl: Duration,
}

/// Result of the close-check half of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionCheck {
    /// No stop-loss order is tracked
    Idle,
    /// The stop-loss order is still live
    Open,
    /// The stop-loss order is gone; the position was marked closed
    Closed,
    /// The exchange gave no usable answer, or the live position has no
    /// stop-loss to check; state left as is
    Unresolved,
}

/// Result of the open-check half of a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum OpenCheck {
    AlreadyActive,
    Hold,
    Opened {
        direction: PositionDirection,
        quantity: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        sl_order_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No position row exists yet (run `init-position`)
    NoPositionState,
    /// Another worker holds a live claim on the position row
    Busy,
    Completed {
        position: PositionCheck,
        open: OpenCheck,
    },
}

/// Runs the close-check / open-check cycle against one stored position row
pub struct CycleRunner<S> {
    agent: CandleAgent<S>,
    store: Arc<S>,
    strategy: Box<dyn Strategy>,
    config: CycleConfig,
}

impl<S: CandleStore + PositionStore> CycleRunner<S> {
    pub fn new(agent: CandleAgent<S>, store: Arc<S>, config: CycleConfig) -> Self {
        Self {
            agent,
            store,
            strategy: Box::new(StreakStrategy::default()),
            config,
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn agent(&self) -> &CandleAgent<S> {
        &self.agent
    }

    async fn pause(&self) {
        if !self.config.call_pause.is_zero() {
            tokio::time::sleep(self.config.call_pause).await;
        }
    }

    /// Claim the position row, close-check, pause, open-check, release
    ///
    /// The row is read again once claimed, so the cycle never acts on state
    /// another worker changed before the claim. The claim is released whether
    /// or not the body failed.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Some(position_id) = self.store.load_position_state().await?.map(|state| state.id) else {
            tracing::warn!("No position state stored, skipping cycle");
            return Ok(CycleOutcome::NoPositionState);
        };

        let Some(claim) = self
            .store
            .claim_cycle(position_id, self.config.claim_ttl)
            .await?
        else {
            tracing::info!("Position {} is claimed by another worker, skipping cycle", position_id);
            return Ok(CycleOutcome::Busy);
        };

        let result = match self.store.load_position_state_by_id(position_id).await {
            Ok(Some(mut state)) => self.run_claimed(&mut state).await,
            Ok(None) => {
                tracing::warn!("Position {} disappeared after claiming it", position_id);
                Ok(CycleOutcome::NoPositionState)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.store.release_cycle(&claim).await {
            tracing::error!("Failed to release claim on position {}: {}", position_id, e);
        }

        result
    }

    async fn run_claimed(&self, state: &mut PositionState) -> Result<CycleOutcome> {
        let trading = TradingClient::new(
            self.config.trading_base_url.clone(),
            state.credentials.clone(),
        )?;

        let position = self.check_position(&trading, state).await?;
        self.pause().await;
        let open = self.check_candles_and_open(&trading, state).await?;

        Ok(CycleOutcome::Completed { position, open })
    }

    /// Detect a position closed by its stop-loss or take-profit
    ///
    /// Re-submits the stop-loss at its stored price. When the exchange says the
    /// order was already changed, the position is over: it is marked inactive and
    /// the cursor moves to now so the next streak only counts newer candles.
    pub async fn check_position(
        &self,
        trading: &TradingClient,
        state: &mut PositionState,
    ) -> Result<PositionCheck> {
        let Some(remote_id) = state.remote_id.clone() else {
            if state.is_position_active {
                tracing::warn!(
                    "Position {} is active without a stop-loss order, resolve it manually ({})",
                    state.id,
                    state.trace.as_deref().unwrap_or("no trace")
                );
                return Ok(PositionCheck::Unresolved);
            }
            return Ok(PositionCheck::Idle);
        };
        let Some(sl_price) = state.sl_order_price else {
            tracing::warn!("Stop-loss order {} has no stored trigger price", remote_id);
            return Ok(PositionCheck::Unresolved);
        };

        let outcome = trading
            .modify_conditional_order(self.config.coin, PlanType::StopLoss, &remote_id, sl_price)
            .await?;

        match outcome {
            ModifyOutcome::Changed => {
                let now = Utc::now();
                state.mark_closed(now.timestamp_millis());
                state.trace = Some(format!("closed: stop-loss {} gone at {}", remote_id, now));
                self.store.save_position_state(state).await?;

                tracing::info!(
                    "Position closed (stop-loss {} no longer live), cursor moved to {}",
                    remote_id,
                    state.timestamp_cursor
                );
                Ok(PositionCheck::Closed)
            }
            ModifyOutcome::Modified => {
                tracing::debug!("Stop-loss {} still live", remote_id);
                Ok(PositionCheck::Open)
            }
            ModifyOutcome::Failed => {
                tracing::warn!("Could not check stop-loss {}, will retry next cycle", remote_id);
                Ok(PositionCheck::Unresolved)
            }
        }
    }

    /// Sync candles, evaluate the streak and open a bracketed position on a signal
    pub async fn check_candles_and_open(
        &self,
        trading: &TradingClient,
        state: &mut PositionState,
    ) -> Result<OpenCheck> {
        if state.is_position_active {
            tracing::debug!("Position already active, not looking for entries");
            return Ok(OpenCheck::AlreadyActive);
        }

        self.agent.sync(self.config.page_limit).await?;

        let candles = self
            .store
            .candles_after(
                self.agent.symbol(),
                self.agent.interval(),
                state.timestamp_cursor,
            )
            .await?;

        let signal = self.strategy.generate_signal(&candles)?;
        let Some(direction) = signal.direction() else {
            tracing::info!(
                "{}: hold over {} candles since cursor {}",
                self.strategy.name(),
                candles.len(),
                state.timestamp_cursor
            );
            return Ok(OpenCheck::Hold);
        };

        tracing::info!("{}: {:?} signal", self.strategy.name(), signal);

        let coin = self.config.coin;
        let price = trading.get_mark_price(coin).await?;
        let quantity = order_quantity(self.config.order_notional, price, self.config.size_precision)?;

        let market_order_id = trading
            .place_market_order(coin, quantity, FuturesSide::opening(direction))
            .await?;

        // The fill is persisted before any TP/SL call
        state.mark_entered(format!(
            "entered {:?} {} via market order {} at {}, awaiting TP/SL",
            direction,
            quantity,
            market_order_id,
            Utc::now()
        ))?;
        self.store.save_position_state(state).await?;

        // Bracket off the price after the fill, not the pre-trade quote
        let entry_price = trading.get_mark_price(coin).await?;
        let bracket = bracket_prices(direction, entry_price);

        tracing::info!(
            "Opened {:?} {} {} near {} (sl {}, tp {})",
            direction,
            quantity,
            coin,
            entry_price,
            bracket.stop_loss,
            bracket.take_profit
        );

        self.pause().await;
        trading
            .place_conditional_order(coin, PlanType::TakeProfit, bracket.take_profit, direction, quantity)
            .await?;

        self.pause().await;
        let sl_order_id = trading
            .place_conditional_order(coin, PlanType::StopLoss, bracket.stop_loss, direction, quantity)
            .await?;

        state.mark_opened(sl_order_id.clone(), bracket.stop_loss)?;
        state.trace = Some(format!(
            "opened {:?} {} via market order {} at {}",
            direction,
            quantity,
            market_order_id,
            Utc::now()
        ));
        self.store.save_position_state(state).await?;

        Ok(OpenCheck::Opened {
            direction,
            quantity,
            entry_price,
            stop_loss: bracket.stop_loss,
            take_profit: bracket.take_profit,
            sl_order_id,
        })
    }
}
