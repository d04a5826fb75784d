//! Static and business-rule validation for order requests.
//!
//! Each check is an independent function over the request; the validator
//! runs all of them and accumulates failures. Validation is deterministic:
//! the evaluation time is an explicit argument, never an internal clock.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::domain::errors::ValidationError;
use crate::domain::trading::exchange::Exchange;
use crate::domain::trading::order::{Order, OrderModification, OrderRequest, OrderSide, OrderType};
use crate::domain::trading::order::TimeInForce;

use super::{Checks, SymbolRegistry, SymbolStatus, Validated};

const MAX_SYMBOL_LEN: usize = 20;
const MIN_QUANTITY: i64 = 1;
const MAX_QUANTITY: i64 = 1_000_000;
const MIN_PRICE: Decimal = dec!(0.01);
const MAX_PRICE: Decimal = dec!(100000000);
const MAX_GTD_DAYS: i64 = 365;

pub struct OrderValidator {
    registry: Option<Arc<dyn SymbolRegistry>>,
}

impl OrderValidator {
    pub fn new() -> Self {
        Self { registry: None }
    }

    pub fn with_registry(registry: Arc<dyn SymbolRegistry>) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    /// Validate a new order request. All failures are accumulated.
    pub fn validate_new(&self, request: OrderRequest, now: DateTime<Utc>) -> Validated<OrderRequest> {
        let mut checks = Checks::new();

        checks.run(self.check_symbol(&request.symbol));
        checks.run(check_quantity(request.quantity, request.exchange));
        for outcome in check_price_requirements(&request) {
            checks.run(outcome);
        }
        checks.run(check_stop_limit_relation(&request));
        checks.run(check_time_in_force(
            request.time_in_force,
            request.expiry_date,
            now,
        ));

        checks.finish(request)
    }

    /// Validate a modification against the current order state.
    ///
    /// Symbol, side and order type are structurally immutable (the
    /// modification shape has no such fields); the checks here cover the
    /// state guard, the filled-quantity floor and the price rules for the
    /// order's type.
    pub fn validate_modification(
        &self,
        order: &Order,
        modification: &OrderModification,
    ) -> Validated<()> {
        let mut checks = Checks::new();

        if !order.status.is_modifiable() {
            checks.push(ValidationError::ModificationNotAllowed {
                reason: format!("order {} is {}", order.order_id, order.status),
            });
        }

        if let Some(quantity) = modification.quantity {
            checks.run(check_quantity(quantity, order.exchange));
            if quantity < order.filled_quantity {
                checks.push(ValidationError::InvalidQuantity {
                    reason: format!(
                        "new quantity {} is below filled quantity {}",
                        quantity, order.filled_quantity
                    ),
                });
            }
        }

        if let Some(limit) = modification.limit_price {
            if order.order_type.requires_limit_price() {
                checks.run(check_price_value(limit, "limitPrice", order.exchange));
            } else {
                checks.push(ValidationError::InvalidPrice {
                    field: "limitPrice",
                    reason: format!("not applicable to {} orders", order.order_type),
                });
            }
        }

        if let Some(stop) = modification.stop_price {
            if order.order_type.requires_stop_price() {
                checks.run(check_price_value(stop, "stopPrice", order.exchange));
            } else {
                checks.push(ValidationError::InvalidPrice {
                    field: "stopPrice",
                    reason: format!("not applicable to {} orders", order.order_type),
                });
            }
        }

        checks.finish(())
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), ValidationError> {
        if symbol.trim().is_empty() {
            return Err(ValidationError::InvalidSymbol {
                reason: "symbol must not be blank".into(),
            });
        }
        if symbol.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::InvalidSymbol {
                reason: format!("symbol exceeds {} characters", MAX_SYMBOL_LEN),
            });
        }
        if !symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ValidationError::InvalidSymbol {
                reason: "symbol must be uppercase alphanumeric or underscore".into(),
            });
        }
        if let Some(registry) = &self.registry {
            match registry.status(symbol) {
                SymbolStatus::Suspended => {
                    return Err(ValidationError::InvalidSymbol {
                        reason: format!("symbol {} is suspended from trading", symbol),
                    });
                }
                SymbolStatus::Tradeable | SymbolStatus::Unknown => {}
            }
        }
        Ok(())
    }
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_quantity(quantity: i64, exchange: Exchange) -> Result<(), ValidationError> {
    if quantity < MIN_QUANTITY {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("quantity must be at least {}", MIN_QUANTITY),
        });
    }
    if quantity > MAX_QUANTITY {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("quantity exceeds maximum {}", MAX_QUANTITY),
        });
    }
    let lot = exchange.lot_size();
    if quantity % lot != 0 {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("quantity must be a multiple of lot size {}", lot),
        });
    }
    Ok(())
}

/// Per-order-type price presence, plus range/tick checks on every price
/// that is present. Returns one outcome per price field so failures on both
/// fields surface together.
fn check_price_requirements(request: &OrderRequest) -> Vec<Result<(), ValidationError>> {
    let mut outcomes = Vec::new();

    if request.order_type.requires_limit_price() {
        match request.limit_price {
            None => outcomes.push(Err(ValidationError::InvalidPrice {
                field: "limitPrice",
                reason: format!("required for {} orders", request.order_type),
            })),
            Some(limit) => outcomes.push(check_price_value(limit, "limitPrice", request.exchange)),
        }
    } else if let Some(limit) = request.limit_price {
        outcomes.push(check_price_value(limit, "limitPrice", request.exchange));
    }

    if request.order_type.requires_stop_price() {
        match request.stop_price {
            None => outcomes.push(Err(ValidationError::InvalidPrice {
                field: "stopPrice",
                reason: format!("required for {} orders", request.order_type),
            })),
            Some(stop) => outcomes.push(check_price_value(stop, "stopPrice", request.exchange)),
        }
    } else if let Some(stop) = request.stop_price {
        outcomes.push(check_price_value(stop, "stopPrice", request.exchange));
    }

    outcomes
}

fn check_price_value(
    price: Decimal,
    field: &'static str,
    exchange: Exchange,
) -> Result<(), ValidationError> {
    if price < MIN_PRICE || price > MAX_PRICE {
        return Err(ValidationError::InvalidPrice {
            field,
            reason: format!("price {} outside [{}, {}]", price, MIN_PRICE, MAX_PRICE),
        });
    }
    let tick = exchange.tick_size();
    if price % tick != Decimal::ZERO {
        return Err(ValidationError::InvalidPrice {
            field,
            reason: format!("price {} is not a multiple of tick size {}", price, tick),
        });
    }
    Ok(())
}

/// STOP_LIMIT relation: BUY requires stop >= limit, SELL requires stop <= limit.
fn check_stop_limit_relation(request: &OrderRequest) -> Result<(), ValidationError> {
    if request.order_type != OrderType::StopLimit {
        return Ok(());
    }
    let (Some(stop), Some(limit)) = (request.stop_price, request.limit_price) else {
        // Presence failures are already reported by the price checks.
        return Ok(());
    };
    match request.side {
        OrderSide::Buy if stop < limit => Err(ValidationError::InvalidPrice {
            field: "stopPrice",
            reason: format!("BUY stop {} must be >= limit {}", stop, limit),
        }),
        OrderSide::Sell if stop > limit => Err(ValidationError::InvalidPrice {
            field: "stopPrice",
            reason: format!("SELL stop {} must be <= limit {}", stop, limit),
        }),
        _ => Ok(()),
    }
}

fn check_time_in_force(
    time_in_force: TimeInForce,
    expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    match (time_in_force, expiry) {
        (TimeInForce::Gtd, None) => Err(ValidationError::TimeInForceError {
            reason: "GTD orders require an expiry date".into(),
        }),
        (TimeInForce::Gtd, Some(expiry)) => {
            if expiry <= now {
                return Err(ValidationError::TimeInForceError {
                    reason: "GTD expiry must be strictly in the future".into(),
                });
            }
            if expiry > now + Duration::days(MAX_GTD_DAYS) {
                return Err(ValidationError::TimeInForceError {
                    reason: format!("GTD expiry more than {} days ahead", MAX_GTD_DAYS),
                });
            }
            Ok(())
        }
        (_, Some(_)) => Err(ValidationError::TimeInForceError {
            reason: format!("{} orders must not carry an expiry date", time_in_force),
        }),
        (_, None) => Ok(()),
    }
}
