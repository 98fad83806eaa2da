//! Donor-facing payment page served at `GET /payment/{nonce}`.

use std::fmt::Write;

use tipstream::DonationStatus;
use tipstream::request::PaymentRequest;
use tipstream::timestamp::UnixTimestamp;

/// Seconds between automatic reloads while a payment is still awaited.
const REFRESH_SECS: u64 = 15;

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Headline and CSS color for the request's state at `now`.
fn headline(request: &PaymentRequest, now: UnixTimestamp) -> (&'static str, &'static str) {
    match request.status {
        DonationStatus::Created | DonationStatus::PendingPayment if request.is_expired(now) => {
            ("Payment window expired", "#d33")
        }
        DonationStatus::Created | DonationStatus::PendingPayment => ("Waiting for payment", "#e90"),
        DonationStatus::Cancelled => ("Payment cancelled", "#d33"),
        _ => ("Payment confirmed", "#2a2"),
    }
}

/// Renders the page for `request`.
#[must_use]
pub fn render(request: &PaymentRequest, now: UnixTimestamp) -> String {
    let (status, color) = headline(request, now);
    let awaiting = !request.status.is_confirmed()
        && !request.status.is_terminal()
        && !request.is_expired(now);
    let refresh = if awaiting {
        format!(r#"<meta http-equiv="refresh" content="{REFRESH_SECS}">"#)
    } else {
        String::new()
    };
    let remaining = request.expires_at.as_secs().saturating_sub(now.as_secs());

    let mut rows = String::new();
    for (label, value) in [
        ("From", request.donor_name.as_str()),
        ("Message", request.message.as_str()),
        ("Network", request.network.as_str()),
        ("Pay to", request.destination_address.as_str()),
    ] {
        if !value.is_empty() {
            let _ = write!(rows, "<dt>{label}</dt><dd>{}</dd>", escape(value));
        }
    }
    if awaiting {
        let _ = write!(
            rows,
            "<dt>Expires in</dt><dd>{}:{:02}</dd>",
            remaining / 60,
            remaining % 60
        );
    }
    if let Some(hash) = &request.transaction_hash {
        let _ = write!(rows, "<dt>Transaction</dt><dd><code>{}</code></dd>", escape(hash));
    }

    let amount = format!("{} {}", request.amount.normalize(), escape(&request.asset_symbol));
    let url = escape(&request.payment_url);
    let nonce = escape(&request.nonce);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
{refresh}
<title>Donation: {amount}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 32rem; margin: 2rem auto; padding: 0 1rem; }}
.status {{ color: {color}; font-weight: 600; }}
.amount {{ font-size: 2rem; margin: .5rem 0; }}
dt {{ color: #666; font-size: .85rem; }}
dd {{ margin: 0 0 .5rem 0; word-break: break-all; }}
img {{ width: 16rem; height: 16rem; }}
</style>
</head>
<body>
<p class="status">{status}</p>
<p class="amount">{amount}</p>
<img src="/qr/{nonce}" alt="Payment QR code">
<p><a href="{url}">Open in wallet</a></p>
<dl>{rows}</dl>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn request(status: DonationStatus) -> PaymentRequest {
        let created = UnixTimestamp::from_secs(1_700_000_000);
        PaymentRequest {
            nonce: "n1".to_owned(),
            donation_id: "d1".to_owned(),
            destination_address: "0xab5801a7d398351b8be11c439e05c5b3259aec9b".to_owned(),
            asset_symbol: "ETH".to_owned(),
            network: "ethereum".to_owned(),
            amount: Decimal::new(50, 2),
            payment_url: "ethereum:0xab5801a7d398351b8be11c439e05c5b3259aec9b@1?value=5&nonce=n1"
                .to_owned(),
            qr_code_url: "http://localhost:50052/qr/n1".to_owned(),
            donor_name: "<b>alice</b>".to_owned(),
            message: String::new(),
            status,
            created_at: created,
            expires_at: created + 900,
            updated_at: created,
            transaction_hash: None,
            revision: 0,
            observation: None,
        }
    }

    #[test]
    fn test_pending_page_refreshes_and_escapes() {
        let request = request(DonationStatus::PendingPayment);
        let html = render(&request, request.created_at + 300);
        assert!(html.contains("Waiting for payment"));
        assert!(html.contains("0.5 ETH"));
        assert!(html.contains("http-equiv=\"refresh\""));
        assert!(html.contains("<dd>10:00</dd>"));
        assert!(html.contains("&lt;b&gt;alice&lt;/b&gt;"));
        assert!(!html.contains("<b>alice"));
        assert!(html.contains(r#"src="/qr/n1""#));
    }

    #[test]
    fn test_expired_and_confirmed_pages_stop_refreshing() {
        let pending = request(DonationStatus::PendingPayment);
        let html = render(&pending, pending.expires_at + 1);
        assert!(html.contains("Payment window expired"));
        assert!(!html.contains("refresh"));

        let mut confirmed = request(DonationStatus::PaymentConfirmed);
        confirmed.transaction_hash = Some("0xfeed".to_owned());
        let html = render(&confirmed, confirmed.created_at);
        assert!(html.contains("Payment confirmed"));
        assert!(html.contains("<code>0xfeed</code>"));
        assert!(!html.contains("refresh"));
    }
}
