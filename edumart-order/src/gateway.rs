use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use edumart_core::payment::{GatewayCallback, PaymentGateway, PaymentUrlRequest};
use edumart_core::{CoreError, CoreResult};
use edumart_shared::pii::Masked;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};
use subtle::ConstantTimeEq;
use tracing::{error, warn};
use url::form_urlencoded;
use url::Url;

type HmacSha512 = Hmac<Sha512>;

pub const VNPAY_PROVIDER: &str = "VNPAY";

const SECURE_HASH: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

/// VNPay merchant settings, loaded from the `payment.vnpay` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct VnPaySettings {
    pub tmn_code: String,
    pub hash_secret: Masked<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub return_url: String,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_base_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}

fn default_callback_path() -> String {
    "/payment/callback".to_string()
}

fn default_version() -> String {
    "2.1.0".to_string()
}

fn default_locale() -> String {
    "vn".to_string()
}

impl VnPaySettings {
    pub fn sandbox(tmn_code: &str, hash_secret: &str, return_url: &str) -> Self {
        Self {
            tmn_code: tmn_code.to_string(),
            hash_secret: Masked::new(hash_secret.to_string()),
            base_url: default_base_url(),
            return_url: return_url.to_string(),
            callback_path: default_callback_path(),
            allowed_origins: Vec::new(),
            version: default_version(),
            locale: default_locale(),
        }
    }
}

/// HMAC-SHA512 signed redirect gateway.
pub struct VnPayGateway {
    settings: VnPaySettings,
}

impl VnPayGateway {
    pub fn new(settings: VnPaySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &VnPaySettings {
        &self.settings
    }

    /// Lowercase hex HMAC-SHA512 of `data` under the merchant secret.
    pub fn sign(&self, data: &str) -> CoreResult<String> {
        let mut mac = HmacSha512::new_from_slice(self.settings.hash_secret.expose().as_bytes())
            .map_err(|e| CoreError::InternalError(format!("invalid VNPay hash secret: {}", e)))?;
        mac.update(data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Sorted, form-encoded query with `vnp_SecureHash` appended. Empty values are left out.
    pub fn signed_query(&self, params: &BTreeMap<String, String>) -> CoreResult<String> {
        let query = params
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let hash = self.sign(&query)?;
        Ok(format!("{}&{}={}", query, SECURE_HASH, hash))
    }

    /// Where the buyer lands after paying: the caller's own origin when it is whitelisted,
    /// otherwise the configured return URL.
    pub fn return_url_for(&self, origin: Option<&str>, referer: Option<&str>) -> String {
        let candidate = origin
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .or_else(|| {
                referer
                    .and_then(|r| Url::parse(r).ok())
                    .map(|u| u.origin().ascii_serialization())
            });

        match candidate {
            Some(origin) if self.is_allowed_origin(&origin) => {
                format!("{}{}", origin.trim_end_matches('/'), self.settings.callback_path)
            }
            Some(origin) => {
                warn!("Origin {} is not whitelisted, using configured return URL", origin);
                self.settings.return_url.clone()
            }
            None => self.settings.return_url.clone(),
        }
    }

    fn is_allowed_origin(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.settings
            .allowed_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/').eq_ignore_ascii_case(origin))
    }
}

#[async_trait]
impl PaymentGateway for VnPayGateway {
    fn provider(&self) -> &'static str {
        VNPAY_PROVIDER
    }

    async fn create_payment_url(&self, request: &PaymentUrlRequest) -> CoreResult<String> {
        let amount = minor_units(request.amount)?;
        let locale = request
            .locale
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.settings.locale.clone());
        let return_url = request
            .return_url
            .clone()
            .unwrap_or_else(|| self.settings.return_url.clone());

        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), self.settings.version.clone());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.settings.tmn_code.clone());
        params.insert("vnp_Amount".to_string(), amount.to_string());
        params.insert("vnp_CurrCode".to_string(), "VND".to_string());
        params.insert("vnp_TxnRef".to_string(), request.txn_ref.clone());
        params.insert("vnp_OrderInfo".to_string(), request.order_info.clone());
        params.insert("vnp_OrderType".to_string(), "other".to_string());
        params.insert("vnp_Locale".to_string(), locale);
        params.insert("vnp_ReturnUrl".to_string(), return_url);
        params.insert("vnp_IpAddr".to_string(), request.client_ip.clone());
        params.insert("vnp_CreateDate".to_string(), vnpay_timestamp(request.created_at));
        params.insert("vnp_ExpireDate".to_string(), vnpay_timestamp(request.expires_at));
        if let Some(bank_code) = request.bank_code.as_ref().filter(|b| !b.is_empty()) {
            params.insert("vnp_BankCode".to_string(), bank_code.clone());
        }

        Ok(format!("{}?{}", self.settings.base_url, self.signed_query(&params)?))
    }

    fn verify_callback(&self, raw_query: &str) -> CoreResult<GatewayCallback> {
        let mut signed: BTreeMap<&str, &str> = BTreeMap::new();
        let mut received_hash = None;

        for part in raw_query.trim_start_matches('?').split('&') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            if key.eq_ignore_ascii_case(SECURE_HASH) {
                received_hash = Some(value);
            } else if !key.eq_ignore_ascii_case(SECURE_HASH_TYPE) {
                signed.insert(key, value);
            }
        }

        let Some(received_hash) = received_hash.filter(|h| !h.is_empty()) else {
            warn!("VNPay callback arrived without a secure hash");
            return Err(CoreError::SignatureInvalid);
        };

        let hash_data = signed
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        if !hashes_match(&self.sign(&hash_data)?, received_hash) {
            error!("VNPay callback signature mismatch");
            return Err(CoreError::SignatureInvalid);
        }

        let fields: HashMap<&str, String> = signed
            .iter()
            .map(|(k, v)| (*k, decode(v)))
            .collect();
        let field = |name: &str| fields.get(name).filter(|v| !v.is_empty()).cloned();

        let txn_ref = field("vnp_TxnRef")
            .ok_or_else(|| CoreError::ValidationError("callback is missing vnp_TxnRef".into()))?;
        let raw_amount = field("vnp_Amount").unwrap_or_default();
        let amount = raw_amount
            .parse::<i64>()
            .map(|minor| Decimal::new(minor, 2))
            .map_err(|_| CoreError::ValidationError(format!("malformed vnp_Amount '{}'", raw_amount)))?;

        Ok(GatewayCallback {
            txn_ref,
            transaction_no: field("vnp_TransactionNo"),
            response_code: field("vnp_ResponseCode").unwrap_or_default(),
            transaction_status: field("vnp_TransactionStatus").unwrap_or_default(),
            amount,
            bank_code: field("vnp_BankCode"),
            card_type: field("vnp_CardType"),
            pay_date: field("vnp_PayDate"),
            order_info: field("vnp_OrderInfo"),
        })
    }

    fn describe_response(&self, response_code: &str) -> String {
        response_description(response_code)
    }

    fn resolve_return_url(&self, origin: Option<&str>, referer: Option<&str>) -> Option<String> {
        Some(self.return_url_for(origin, referer))
    }
}

pub fn response_description(code: &str) -> String {
    let text = match code {
        "00" => "Transaction successful",
        "07" => "Money deducted, transaction flagged as suspicious",
        "09" => "Card or account is not registered for internet banking",
        "10" => "Card or account authentication failed more than 3 times",
        "11" => "Payment window timed out",
        "12" => "Card or account is locked",
        "13" => "Wrong transaction OTP",
        "24" => "Customer cancelled the transaction",
        "51" => "Insufficient account balance",
        "65" => "Daily transaction limit exceeded",
        "75" => "Bank is under maintenance",
        "79" => "Wrong payment password entered too many times",
        "99" => "Unknown error",
        other => return format!("Unknown response code {}", other),
    };
    text.to_string()
}

/// VND amounts travel as integers multiplied by 100.
fn minor_units(amount: Decimal) -> CoreResult<i64> {
    let scaled = amount * Decimal::ONE_HUNDRED;
    if amount <= Decimal::ZERO || scaled.fract() != Decimal::ZERO {
        return Err(CoreError::ValidationError(format!(
            "amount {} cannot be sent to VNPay",
            amount
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| CoreError::ValidationError(format!("amount {} is out of range", amount)))
}

/// `yyyyMMddHHmmss` in GMT+7.
fn vnpay_timestamp(at: DateTime<Utc>) -> String {
    (at + Duration::hours(7)).naive_utc().format("%Y%m%d%H%M%S").to_string()
}

/// Form encoding with the gateway's safe set, which also leaves `!`, `(` and `)` alone.
fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .map(|chunk| match chunk {
            "%21" => "!",
            "%28" => "(",
            "%29" => ")",
            other => other,
        })
        .collect()
}

fn decode(raw: &str) -> String {
    form_urlencoded::parse(format!("v={}", raw).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

fn hashes_match(expected: &str, received: &str) -> bool {
    let received = received.to_ascii_lowercase();
    expected.len() == received.len() && bool::from(expected.as_bytes().ct_eq(received.as_bytes()))
}
