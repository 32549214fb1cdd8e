// src/services/costing.rs
//
// Regras de mutação do saldo (on_hand, cost_avg) por tipo de movimentação.
// Funções puras sobre um StockLevel já travado; quem persiste é o serviço.

use rust_decimal::Decimal;

use crate::{common::error::AppError, models::inventory::StockLevel};

/// Casas decimais do custo médio (mesma escala da coluna cost_avg).
pub const COST_SCALE: u32 = 6;
/// Casas decimais de valores monetários das linhas.
pub const VALUE_SCALE: u32 = 4;

/// Quantidades e custos cabem em NUMERIC(18,6): valor absoluto abaixo de 10^12.
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);
/// Valores de linha cabem em NUMERIC(18,4): valor absoluto abaixo de 10^14.
pub const MAX_VALUE: Decimal = Decimal::from_parts(0x107A_4000, 0x5AF3, 0, false, 0);

/// Erro de aritmética fora da faixa. O campo é relativo à linha (`qty`, `unitPrice`).
pub fn out_of_range(field: &str) -> AppError {
    AppError::invalid(field, "Quantidade ou valor fora do intervalo suportado.")
}

/// Custo médio móvel: (h*c + q*p) / (h+q). Se h+q == 0 o custo vira zero.
/// O resultado é arredondado para COST_SCALE casas. `None` em overflow.
pub fn moving_average_cost(
    current_qty: Decimal,
    current_avg: Decimal,
    incoming_qty: Decimal,
    incoming_cost: Decimal,
) -> Option<Decimal> {
    let new_total_qty = current_qty.checked_add(incoming_qty)?;
    if new_total_qty.is_zero() {
        return Some(Decimal::ZERO);
    }
    let total_current_value = current_qty.checked_mul(current_avg)?;
    let total_incoming_value = incoming_qty.checked_mul(incoming_cost)?;
    let total_value = total_current_value.checked_add(total_incoming_value)?;
    Some(total_value.checked_div(new_total_qty)?.round_dp(COST_SCALE))
}

/// Valor de uma linha: quantidade base x custo unitário. `None` fora de NUMERIC(18,4).
pub fn line_value(qty_base: Decimal, unit_cost: Decimal) -> Option<Decimal> {
    let value = qty_base.checked_mul(unit_cost)?.round_dp(VALUE_SCALE);
    (value.abs() < MAX_VALUE).then_some(value)
}

/// Entrada: soma ao saldo e, se houver preço, recalcula o custo médio.
pub fn apply_inbound(level: &mut StockLevel, qty_base: Decimal, unit_price: Option<Decimal>) -> Result<(), AppError> {
    let on_hand = level.on_hand.checked_add(qty_base).ok_or_else(|| out_of_range("qty"))?;
    if let Some(price) = unit_price {
        level.cost_avg = moving_average_cost(level.on_hand, level.cost_avg, qty_base, price)
            .ok_or_else(|| out_of_range("unitPrice"))?;
    }
    level.on_hand = on_hand;
    Ok(())
}

/// Saída: valida o disponível (se o bloqueio estiver ligado) e baixa o saldo.
/// Devolve o custo médio ANTES da baixa, usado para valorar a linha.
pub fn apply_outbound(
    level: &mut StockLevel,
    qty_base: Decimal,
    block_negative: bool,
) -> Result<Decimal, AppError> {
    let on_hand = level.on_hand.checked_sub(qty_base).ok_or_else(|| out_of_range("qty"))?;
    if block_negative {
        let available = level.on_hand.checked_sub(level.reserved).ok_or_else(|| out_of_range("qty"))?;
        if available < qty_base {
            return Err(AppError::InsufficientStock {
                product_id: level.product_id,
                location_id: level.location_id,
                available,
                required: qty_base,
            });
        }
    }
    level.on_hand = on_hand;
    Ok(level.cost_avg)
}

/// Ajuste: positivo se comporta como entrada; negativo só reduz o saldo,
/// sem checar disponível (política mais frouxa para correções).
/// Devolve o custo médio antes do ajuste.
pub fn apply_adjustment(level: &mut StockLevel, qty_base: Decimal, unit_price: Option<Decimal>) -> Result<Decimal, AppError> {
    let cost_before = level.cost_avg;
    if qty_base.is_sign_positive() {
        apply_inbound(level, qty_base, unit_price)?;
    } else {
        level.on_hand = level.on_hand.checked_add(qty_base).ok_or_else(|| out_of_range("qty"))?;
    }
    Ok(cost_before)
}

/// Transferência: saída na origem, entrada no destino valorada pelo custo
/// médio da origem capturado antes da saída. Devolve esse custo.
/// Em erro, nenhum dos dois saldos é alterado.
pub fn apply_transfer(
    source: &mut StockLevel,
    destination: &mut StockLevel,
    qty_base: Decimal,
    block_negative: bool,
) -> Result<Decimal, AppError> {
    let mut source_after = source.clone();
    let source_cost = apply_outbound(&mut source_after, qty_base, block_negative)?;
    apply_inbound(destination, qty_base, Some(source_cost))?;
    *source = source_after;
    Ok(source_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory::StockKey;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn level(on_hand: &str, reserved: &str, cost: &str) -> StockLevel {
        let mut level = StockLevel::empty(StockKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()));
        level.on_hand = dec(on_hand);
        level.reserved = dec(reserved);
        level.cost_avg = dec(cost);
        level
    }

    #[test]
    fn moving_average_weights_by_quantity() {
        // (10*5 + 30*9) / 40 = 8
        assert_eq!(moving_average_cost(dec("10"), dec("5"), dec("30"), dec("9")), Some(dec("8")));
    }

    #[test]
    fn moving_average_degenerate_total_is_zero() {
        assert_eq!(moving_average_cost(dec("-3"), dec("5"), dec("3"), dec("7")), Some(Decimal::ZERO));
    }

    #[test]
    fn moving_average_is_rounded_to_cost_scale() {
        // (1*1 + 2*0) / 3 = 0.333333...
        assert_eq!(moving_average_cost(dec("1"), dec("1"), dec("2"), dec("0")), Some(dec("0.333333")));
    }

    #[test]
    fn line_value_rounds_to_value_scale() {
        assert_eq!(line_value(dec("3"), dec("0.333333")), Some(dec("1")));
        assert_eq!(line_value(dec("2"), dec("0.12344")), Some(dec("0.2469")));
        assert_eq!(line_value(dec("4"), dec("5.00")), Some(dec("20")));
    }

    #[test]
    fn inbound_without_price_keeps_cost() {
        let mut l = level("10", "0", "5");
        apply_inbound(&mut l, dec("2"), None).unwrap();
        assert_eq!(l.on_hand, dec("12"));
        assert_eq!(l.cost_avg, dec("5"));
    }

    #[test]
    fn inbound_on_empty_level_takes_price() {
        let mut l = level("0", "0", "0");
        apply_inbound(&mut l, dec("10"), Some(dec("5.00"))).unwrap();
        assert_eq!(l.on_hand, dec("10"));
        assert_eq!(l.cost_avg, dec("5.00"));
    }

    #[test]
    fn outbound_respects_reserved_when_blocking() {
        let mut l = level("10", "7", "5");
        let err = apply_outbound(&mut l, dec("4"), true).unwrap_err();
        match err {
            AppError::InsufficientStock { available, required, .. } => {
                assert_eq!(available, dec("3"));
                assert_eq!(required, dec("4"));
            }
            other => panic!("erro inesperado: {other:?}"),
        }
        assert_eq!(l.on_hand, dec("10"));
    }

    #[test]
    fn outbound_exactly_available_succeeds() {
        let mut l = level("10", "6", "5");
        let cost = apply_outbound(&mut l, dec("4"), true).unwrap();
        assert_eq!(cost, dec("5"));
        assert_eq!(l.on_hand, dec("6"));
    }

    #[test]
    fn outbound_can_go_negative_when_not_blocking() {
        let mut l = level("1", "0", "5");
        apply_outbound(&mut l, dec("3"), false).unwrap();
        assert_eq!(l.on_hand, dec("-2"));
        assert_eq!(l.cost_avg, dec("5"));
    }

    #[test]
    fn negative_adjustment_bypasses_stock_check() {
        let mut l = level("1", "1", "4");
        let cost = apply_adjustment(&mut l, dec("-5"), Some(dec("100"))).unwrap();
        assert_eq!(cost, dec("4"));
        assert_eq!(l.on_hand, dec("-4"));
        assert_eq!(l.cost_avg, dec("4"));
    }

    #[test]
    fn positive_adjustment_with_price_recomputes_average() {
        let mut l = level("10", "0", "5");
        apply_adjustment(&mut l, dec("10"), Some(dec("7"))).unwrap();
        assert_eq!(l.on_hand, dec("20"));
        assert_eq!(l.cost_avg, dec("6"));
    }

    #[test]
    fn transfer_propagates_source_cost() {
        let mut a = level("10", "0", "5");
        let mut b = level("10", "0", "3");
        let cost = apply_transfer(&mut a, &mut b, dec("10"), true).unwrap();
        assert_eq!(cost, dec("5"));
        assert_eq!(a.on_hand, Decimal::ZERO);
        assert_eq!(a.cost_avg, dec("5"));
        assert_eq!(b.on_hand, dec("20"));
        assert_eq!(b.cost_avg, dec("4"));
    }

    #[test]
    fn transfer_fails_without_touching_destination() {
        let mut a = level("1", "0", "5");
        let mut b = level("0", "0", "0");
        assert!(apply_transfer(&mut a, &mut b, dec("2"), true).is_err());
        assert_eq!(a.on_hand, dec("1"));
        assert_eq!(b.on_hand, Decimal::ZERO);
    }

    #[test]
    fn range_limits_match_column_precision() {
        assert_eq!(MAX_QUANTITY, dec("1000000000000"));
        assert_eq!(MAX_VALUE, dec("100000000000000"));
    }

    #[test]
    fn overflowing_arithmetic_returns_none_instead_of_panicking() {
        assert_eq!(moving_average_cost(Decimal::MAX, dec("2"), dec("1"), dec("1")), None);
        assert_eq!(moving_average_cost(dec("1"), dec("1"), Decimal::MAX, dec("1")), None);
        assert_eq!(line_value(Decimal::MAX, dec("2")), None);
        // cabe no Decimal mas não na coluna
        assert_eq!(line_value(dec("999999999999"), dec("999999999999")), None);
    }

    #[test]
    fn inbound_overflow_is_rejected_and_keeps_level() {
        let mut l = level("1", "0", "5");
        l.on_hand = Decimal::MAX;
        let err = apply_inbound(&mut l, dec("1"), Some(dec("1"))).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest { ref field, .. } if field == "qty"));
        assert_eq!(l.on_hand, Decimal::MAX);
        assert_eq!(l.cost_avg, dec("5"));
    }
}
