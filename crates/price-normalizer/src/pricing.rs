//! 金额换算
//!
//! 每个分项单独乘以汇率后按四舍五入（half-up，远离零）保留两位小数，
//! 总价由已取整的分项相加得到，不对未取整的和再取整。

use rust_decimal::{Decimal, RoundingStrategy};

/// 换算后的订单金额（目标币种，两位小数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedPrices {
    pub cart_price: Decimal,
    pub delivery_price: Decimal,
    pub total_price: Decimal,
}

/// 单个金额换算，溢出时返回 None
pub fn convert_amount(amount: Decimal, rate: Decimal) -> Option<Decimal> {
    let mut converted = amount
        .checked_mul(rate)?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    // 统一为两位小数，1826 显示为 1826.00
    converted.rescale(2);
    Some(converted)
}

/// 换算购物车金额与运费并求总价
pub fn convert(cart_price: Decimal, delivery_price: Decimal, rate: Decimal) -> Option<ConvertedPrices> {
    let cart_price = convert_amount(cart_price, rate)?;
    let delivery_price = convert_amount(delivery_price, rate)?;
    let total_price = cart_price.checked_add(delivery_price)?;

    Some(ConvertedPrices {
        cart_price,
        delivery_price,
        total_price,
    })
}
