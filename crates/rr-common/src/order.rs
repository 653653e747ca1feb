use serde::{Deserialize, Serialize};

/// Plausible customer age bounds accepted at ingest.
pub const MIN_AGE: u32 = 18;
pub const MAX_AGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCategory {
    Electronics,
    Clothing,
    Books,
    #[serde(rename = "Home & Garden")]
    HomeAndGarden,
    Sports,
    Beauty,
    Toys,
    Automotive,
    Health,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::Electronics => "Electronics",
            ProductCategory::Clothing => "Clothing",
            ProductCategory::Books => "Books",
            ProductCategory::HomeAndGarden => "Home & Garden",
            ProductCategory::Sports => "Sports",
            ProductCategory::Beauty => "Beauty",
            ProductCategory::Toys => "Toys",
            ProductCategory::Automotive => "Automotive",
            ProductCategory::Health => "Health",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Electronics" => Some(ProductCategory::Electronics),
            "Clothing" => Some(ProductCategory::Clothing),
            "Books" => Some(ProductCategory::Books),
            // "Home" shows up in older exports as an alias.
            "Home & Garden" | "Home" => Some(ProductCategory::HomeAndGarden),
            "Sports" => Some(ProductCategory::Sports),
            "Beauty" => Some(ProductCategory::Beauty),
            "Toys" => Some(ProductCategory::Toys),
            "Automotive" => Some(ProductCategory::Automotive),
            "Health" => Some(ProductCategory::Health),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            "Other" => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "Credit Card")]
    CreditCard,
    #[serde(rename = "Debit Card")]
    DebitCard,
    PayPal,
    #[serde(rename = "Bank Transfer")]
    BankTransfer,
    Cash,
    #[serde(rename = "Digital Wallet")]
    DigitalWallet,
    #[serde(rename = "Gift Card")]
    GiftCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "Credit Card",
            PaymentMethod::DebitCard => "Debit Card",
            PaymentMethod::PayPal => "PayPal",
            PaymentMethod::BankTransfer => "Bank Transfer",
            PaymentMethod::Cash => "Cash",
            PaymentMethod::DigitalWallet => "Digital Wallet",
            PaymentMethod::GiftCard => "Gift Card",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Credit Card" => Some(PaymentMethod::CreditCard),
            "Debit Card" => Some(PaymentMethod::DebitCard),
            "PayPal" => Some(PaymentMethod::PayPal),
            "Bank Transfer" => Some(PaymentMethod::BankTransfer),
            "Cash" => Some(PaymentMethod::Cash),
            "Digital Wallet" => Some(PaymentMethod::DigitalWallet),
            "Gift Card" => Some(PaymentMethod::GiftCard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShippingMethod {
    Standard,
    Express,
    #[serde(rename = "Next-Day")]
    NextDay,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Standard => "Standard",
            ShippingMethod::Express => "Express",
            ShippingMethod::NextDay => "Next-Day",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Standard" => Some(ShippingMethod::Standard),
            "Express" => Some(ShippingMethod::Express),
            "Next-Day" => Some(ShippingMethod::NextDay),
            _ => None,
        }
    }
}

/// One order accepted for scoring. Immutable once it enters a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Option<String>,
    pub category: ProductCategory,
    pub price: f64,
    pub quantity: u32,
    pub age: u32,
    pub gender: Gender,
    pub location: String,
    pub payment_method: PaymentMethod,
    pub shipping_method: ShippingMethod,
    pub discount_percent: f64,
}

impl OrderRecord {
    pub fn total_value(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}
