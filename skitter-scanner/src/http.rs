//! A browser without JavaScript.
//!
//! `HttpBrowser` fetches documents with reqwest and emulates the handful of
//! interactions that work without a script engine: following anchors,
//! submitting forms and toggling form controls. It is enough to crawl
//! server-rendered applications and is what the integration tests run on.

use crate::browser::{
    BasicAuth, Browser, BrowserError, BrowserResult, InterceptedRequest, RequestDecision, RequestInterceptor,
    WaitPolicy,
};
use crate::locator::css_path;
use async_trait::async_trait;
use reqwest::{Client, Method, Proxy, redirect};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const USER_AGENT: &str = "Skitter/0.1 (https://github.com/trapdoorsec/skitter)";
const EMPTY_DOCUMENT: &str = "<html><head></head><body></body></html>";
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
struct Page {
    url: Url,
    body: String,
}

/// Value recorded for a control through the trait, keyed by its locator.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Text(String),
    Checked,
    Selected(String),
    File(PathBuf),
}

/// What clicking an element amounts to without a script engine.
#[derive(Debug, PartialEq, Eq)]
enum Activation {
    Navigate(Url),
    Submit {
        method: Method,
        action: Url,
        fields: Vec<(String, String)>,
    },
    /// Checkbox or radio, carrying its canonical locator.
    Toggle(String),
    Nothing,
}

pub struct HttpBrowserBuilder {
    timeout: Duration,
    proxy: Option<String>,
}

impl Default for HttpBrowserBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            proxy: None,
        }
    }
}

impl HttpBrowserBuilder {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn build(self) -> BrowserResult<HttpBrowser> {
        // Redirects are followed by hand so every hop passes the interceptor
        let mut client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .connect_timeout(self.timeout / 2)
            .cookie_store(true)
            .redirect(redirect::Policy::none());
        if let Some(proxy) = &self.proxy {
            client = client.proxy(Proxy::all(proxy)?);
        }

        Ok(HttpBrowser {
            client: client.build()?,
            page: None,
            fields: HashMap::new(),
            interceptor: None,
            basic_auth: None,
        })
    }
}

pub struct HttpBrowser {
    client: Client,
    page: Option<Page>,
    fields: HashMap<String, FieldValue>,
    interceptor: Option<RequestInterceptor>,
    basic_auth: Option<BasicAuth>,
}

impl HttpBrowser {
    pub fn builder() -> HttpBrowserBuilder {
        HttpBrowserBuilder::default()
    }

    pub fn new() -> BrowserResult<Self> {
        Self::builder().build()
    }

    fn page(&self) -> BrowserResult<&Page> {
        self.page.as_ref().ok_or(BrowserError::NoPage)
    }

    async fn load(&mut self, method: Method, url: Url, form: Vec<(String, String)>) -> BrowserResult<()> {
        let page = self.fetch(method, url, form).await?;
        debug!("Loaded {}", page.url);
        self.page = Some(page);
        self.fields.clear();
        Ok(())
    }

    async fn fetch(
        &self,
        mut method: Method,
        mut url: Url,
        mut form: Vec<(String, String)>,
    ) -> BrowserResult<Page> {
        for _ in 0..=MAX_REDIRECTS {
            if let Some(interceptor) = &self.interceptor {
                let request = InterceptedRequest {
                    url: url.to_string(),
                    method: method.to_string(),
                    is_navigation: true,
                };
                if let RequestDecision::Fulfill { status, body } = interceptor(&request) {
                    trace!("Fulfilled {} locally with {}", url, status);
                    return Ok(Page { url, body });
                }
            }

            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(auth) = self.basic_auth.as_ref().filter(|a| a.applies_to(url.as_str())) {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }
            if method == Method::POST {
                request = request.form(&form);
            }
            let response = request.send().await.map_err(|e| transport_error(&url, e))?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| url.join(v).ok());
                let Some(next) = location else {
                    return Err(BrowserError::Protocol(format!(
                        "redirect from {} without a usable Location",
                        url
                    )));
                };
                // 307/308 replay the request, everything else turns into a GET
                let status = response.status().as_u16();
                if status != 307 && status != 308 {
                    method = Method::GET;
                    form.clear();
                }
                trace!("Redirect {} -> {}", url, next);
                url = next;
                continue;
            }

            let is_html = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_none_or(|ct| ct.contains("html"));
            let final_url = response.url().clone();
            let body = if is_html {
                response.text().await.map_err(|e| transport_error(&final_url, e))?
            } else {
                EMPTY_DOCUMENT.to_string()
            };
            return Ok(Page {
                url: final_url,
                body,
            });
        }

        Err(BrowserError::Protocol(format!(
            "more than {} redirects",
            MAX_REDIRECTS
        )))
    }

    /// Resolves `locator` on the current page and returns the element's own
    /// CSS path, the key under which field values are recorded.
    fn canonical_locator(&self, locator: &str) -> BrowserResult<String> {
        let page = self.page()?;
        let document = Html::parse_document(&page.body);
        find(&document, locator).map(css_path)
    }

    fn record(&mut self, locator: &str, value: FieldValue) -> BrowserResult<()> {
        let key = self.canonical_locator(locator)?;
        self.fields.insert(key, value);
        Ok(())
    }

    async fn activate(&mut self, locator: &str) -> BrowserResult<()> {
        let activation = {
            let page = self.page()?;
            resolve_activation(&page.body, &page.url, locator, &self.fields)?
        };

        match activation {
            Activation::Navigate(url) => self.load(Method::GET, url, Vec::new()).await,
            Activation::Submit {
                method,
                mut action,
                fields,
            } => {
                if method == Method::GET {
                    action.query_pairs_mut().clear().extend_pairs(&fields);
                    action.set_fragment(None);
                    self.load(Method::GET, action, Vec::new()).await
                } else {
                    self.load(method, action, fields).await
                }
            }
            Activation::Toggle(key) => {
                self.fields.insert(key, FieldValue::Checked);
                Ok(())
            }
            Activation::Nothing => {
                trace!("Click on {} has no effect without scripts", locator);
                Ok(())
            }
        }
    }
}

/// A request that ran out of time is a slow navigation, not a broken one.
fn transport_error(url: &Url, error: reqwest::Error) -> BrowserError {
    if error.is_timeout() {
        BrowserError::NavigationTimeout(format!("{}: {}", url, error))
    } else {
        BrowserError::Http(error)
    }
}

fn find<'a>(document: &'a Html, locator: &str) -> BrowserResult<ElementRef<'a>> {
    let selector =
        Selector::parse(locator).map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
    document
        .select(&selector)
        .next()
        .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
}

/// Anchor target, following the same rules as link extraction: scripts,
/// mail and phone links and bare fragments go nowhere.
fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url)
}

fn resolve_activation(
    body: &str,
    base: &Url,
    locator: &str,
    fields: &HashMap<String, FieldValue>,
) -> BrowserResult<Activation> {
    let document = Html::parse_document(body);
    let element = find(&document, locator)?;
    let value = element.value();
    let kind = value.attr("type").unwrap_or_default().to_ascii_lowercase();

    let activation = match value.name() {
        "a" | "area" => value
            .attr("href")
            .and_then(|href| resolve_href(base, href))
            .map_or(Activation::Nothing, Activation::Navigate),
        "button" if matches!(kind.as_str(), "" | "submit") => submit(element, base, fields),
        "input" => match kind.as_str() {
            "submit" | "image" => submit(element, base, fields),
            "checkbox" | "radio" => Activation::Toggle(css_path(element)),
            _ => Activation::Nothing,
        },
        _ => Activation::Nothing,
    };
    Ok(activation)
}

fn submit(submitter: ElementRef<'_>, base: &Url, fields: &HashMap<String, FieldValue>) -> Activation {
    let Some(form) = submitter
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
    else {
        return Activation::Nothing;
    };

    let attr = |name: &str| {
        submitter
            .value()
            .attr(&format!("form{}", name))
            .or_else(|| form.value().attr(name))
    };
    let method = match attr("method").map(str::to_ascii_lowercase).as_deref() {
        Some("post") => Method::POST,
        _ => Method::GET,
    };
    let action = attr("action")
        .filter(|a| !a.trim().is_empty())
        .and_then(|a| base.join(a.trim()).ok())
        .unwrap_or_else(|| base.clone());

    Activation::Submit {
        method,
        action,
        fields: form_data(form, submitter, fields),
    }
}

/// Successful controls of `form` in document order, with values recorded
/// through the trait taking precedence over the markup's defaults.
fn form_data(
    form: ElementRef<'_>,
    submitter: ElementRef<'_>,
    fields: &HashMap<String, FieldValue>,
) -> Vec<(String, String)> {
    let controls: Vec<ElementRef<'_>> = form
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "input" | "textarea" | "select" | "button"))
        .filter(|el| el.value().attr("name").is_some() && el.value().attr("disabled").is_none())
        .collect();

    let recorded = |el: &ElementRef<'_>| fields.get(&css_path(*el));

    // Radio groups where a choice was made through the trait
    let chosen_groups: HashSet<&str> = controls
        .iter()
        .filter(|el| el.value().attr("type").is_some_and(|t| t.eq_ignore_ascii_case("radio")))
        .filter(|el| recorded(*el) == Some(&FieldValue::Checked))
        .filter_map(|el| el.value().attr("name"))
        .collect();

    let mut data = Vec::new();
    for el in controls {
        let value = el.value();
        let Some(name) = value.attr("name") else {
            continue;
        };
        let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
        let entry = match (value.name(), kind.as_str()) {
            ("button", _) | ("input", "submit" | "image" | "button" | "reset") => {
                (el == submitter).then(|| value.attr("value").unwrap_or_default().to_string())
            }
            ("input", "checkbox") => {
                let checked =
                    recorded(&el) == Some(&FieldValue::Checked) || value.attr("checked").is_some();
                checked.then(|| value.attr("value").unwrap_or("on").to_string())
            }
            ("input", "radio") => {
                let checked = match recorded(&el) {
                    Some(FieldValue::Checked) => true,
                    _ if chosen_groups.contains(name) => false,
                    _ => value.attr("checked").is_some(),
                };
                checked.then(|| value.attr("value").unwrap_or("on").to_string())
            }
            ("input", "file") => Some(match recorded(&el) {
                Some(FieldValue::File(path)) => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                _ => String::new(),
            }),
            ("textarea", _) => Some(match recorded(&el) {
                Some(FieldValue::Text(text)) => text.clone(),
                _ => el.text().collect(),
            }),
            ("select", _) => Some(match recorded(&el) {
                Some(FieldValue::Selected(choice)) => choice.clone(),
                _ => default_option(el).unwrap_or_default(),
            }),
            _ => Some(match recorded(&el) {
                Some(FieldValue::Text(text)) => text.clone(),
                _ => value.attr("value").unwrap_or_default().to_string(),
            }),
        };
        if let Some(entry) = entry {
            data.push((name.to_string(), entry));
        }
    }
    data
}

fn default_option(select: ElementRef<'_>) -> Option<String> {
    let options: Vec<ElementRef<'_>> = select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "option")
        .collect();
    let chosen = options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())?;
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| chosen.text().collect::<String>().trim().to_string()),
    )
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn navigate(&mut self, url: &str, _wait: WaitPolicy) -> BrowserResult<()> {
        let url = Url::parse(url).map_err(|e| BrowserError::Protocol(format!("{}: {}", url, e)))?;
        self.load(Method::GET, url, Vec::new()).await
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.url.to_string())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.body.clone())
    }

    // Documents are complete once fetched
    async fn wait_for_load(&mut self, _timeout: Duration) -> BrowserResult<()> {
        self.page().map(|_| ())
    }

    async fn wait_for_network_idle(&mut self, _timeout: Duration) -> BrowserResult<()> {
        self.page().map(|_| ())
    }

    async fn wait_for_selector(&mut self, locator: &str, _timeout: Duration) -> BrowserResult<()> {
        // Nothing can make a missing element appear later
        self.canonical_locator(locator).map(|_| ())
    }

    async fn click(&mut self, locator: &str) -> BrowserResult<()> {
        self.activate(locator).await
    }

    async fn programmatic_click(&mut self, locator: &str) -> BrowserResult<()> {
        self.activate(locator).await
    }

    async fn type_text(&mut self, locator: &str, text: &str) -> BrowserResult<()> {
        self.record(locator, FieldValue::Text(text.to_string()))
    }

    async fn set_checked(&mut self, locator: &str) -> BrowserResult<()> {
        self.record(locator, FieldValue::Checked)
    }

    async fn select_option(&mut self, locator: &str, value: &str) -> BrowserResult<()> {
        self.record(locator, FieldValue::Selected(value.to_string()))
    }

    async fn upload_file(&mut self, locator: &str, path: &Path) -> BrowserResult<()> {
        self.record(locator, FieldValue::File(path.to_path_buf()))
    }

    async fn set_request_interceptor(&mut self, interceptor: RequestInterceptor) -> BrowserResult<()> {
        self.interceptor = Some(interceptor);
        Ok(())
    }

    async fn set_basic_auth(&mut self, credentials: BasicAuth) -> BrowserResult<()> {
        self.basic_auth = Some(credentials);
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.page = None;
        self.fields.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header_exists, method, path, query_param},
    };

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html")
            .set_body_bytes(body.as_bytes().to_vec())
    }

    #[test]
    fn test_resolve_href_skips_non_navigations() {
        let base = Url::parse("https://example.com/dir/page").unwrap();
        assert_eq!(resolve_href(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_href(&base, "mailto:a@b.c"), None);
        assert_eq!(resolve_href(&base, "#top"), None);
        assert_eq!(
            resolve_href(&base, "other#frag").map(String::from),
            Some("https://example.com/dir/other".to_string())
        );
    }

    #[test]
    fn test_button_outside_form_does_nothing() {
        let base = Url::parse("https://example.com/").unwrap();
        let activation = resolve_activation(
            "<html><body><button id=b>Go</button></body></html>",
            &base,
            "#b",
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(activation, Activation::Nothing);
    }

    #[test]
    fn test_form_data_defaults_and_overrides() {
        let body = r#"<html><body><form action="/search">
            <input type="hidden" name="csrf" value="tok">
            <input type="text" name="q" value="default">
            <input type="checkbox" name="exact">
            <input type="radio" name="sort" value="new" checked>
            <input type="radio" name="sort" value="old">
            <select name="lang"><option value="en">EN</option><option value="fr" selected>FR</option></select>
            <input type="submit" name="go" value="Search">
        </form></body></html>"#;
        let document = Html::parse_document(body);
        let q = css_path(find(&document, "input[name=q]").unwrap());
        let exact = css_path(find(&document, "input[name=exact]").unwrap());
        let old = css_path(find(&document, r#"input[value="old"]"#).unwrap());

        let mut fields = HashMap::new();
        fields.insert(q, FieldValue::Text("skitter".to_string()));
        fields.insert(exact, FieldValue::Checked);
        fields.insert(old, FieldValue::Checked);

        let base = Url::parse("https://example.com/").unwrap();
        let activation =
            resolve_activation(body, &base, "input[type=submit]", &fields).unwrap();
        let Activation::Submit {
            method,
            action,
            fields,
        } = activation
        else {
            panic!("expected a form submission");
        };
        assert_eq!(method, Method::GET);
        assert_eq!(action.as_str(), "https://example.com/search");
        let pairs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("csrf", "tok"),
                ("q", "skitter"),
                ("exact", "on"),
                ("sort", "old"),
                ("lang", "fr"),
                ("go", "Search"),
            ]
        );
    }

    #[tokio::test]
    async fn test_navigate_and_follow_anchor() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(r#"<html><body><a href="/next">Next</a></body></html>"#))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/next"))
            .respond_with(html("<html><body><p>next page</p></body></html>"))
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        browser
            .navigate(&format!("{}/", mock_server.uri()), WaitPolicy::Load)
            .await
            .unwrap();
        browser.click("body > a").await.unwrap();

        assert_eq!(
            browser.current_url().await.unwrap(),
            format!("{}/next", mock_server.uri())
        );
        assert!(browser.content().await.unwrap().contains("next page"));
    }

    #[tokio::test]
    async fn test_missing_locator_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<html><body></body></html>"))
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        browser.navigate(&mock_server.uri(), WaitPolicy::Load).await.unwrap();
        let err = browser.click("body > a.gone").await.unwrap_err();
        assert!(matches!(err, BrowserError::ElementNotFound(_)));
        assert!(matches!(
            browser.type_text("#nope", "x").await,
            Err(BrowserError::ElementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_post_form_with_typed_values() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(html(
                r#"<html><body><form method="post" action="/session">
                    <input type="text" name="user">
                    <input type="password" name="pass">
                    <button type="submit">Sign in</button>
                </form></body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_string_contains("user=skitter"))
            .and(body_string_contains("pass=Skitter%401234"))
            .respond_with(html("<html><body>welcome</body></html>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        browser
            .navigate(&format!("{}/login", mock_server.uri()), WaitPolicy::Load)
            .await
            .unwrap();
        browser
            .type_text("body > form > input:nth-child(1)", "skitter")
            .await
            .unwrap();
        browser
            .type_text("body > form > input:nth-child(2)", "Skitter@1234")
            .await
            .unwrap();
        browser.click("body > form > button").await.unwrap();

        assert!(browser.content().await.unwrap().contains("welcome"));
    }

    #[tokio::test]
    async fn test_get_form_builds_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<html><body><form action="/find"><input type="search" name="q"><input type="submit"></form></body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/find"))
            .and(query_param("q", "skitter"))
            .respond_with(html("<html><body>results</body></html>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        browser.navigate(&format!("{}/", mock_server.uri()), WaitPolicy::Load).await.unwrap();
        browser.type_text("input[type=search]", "skitter").await.unwrap();
        browser.click("input[type=submit]").await.unwrap();
        assert!(browser.content().await.unwrap().contains("results"));
    }

    #[tokio::test]
    async fn test_redirects_are_followed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(html("<html><body>moved</body></html>"))
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        browser
            .navigate(&format!("{}/old", mock_server.uri()), WaitPolicy::Load)
            .await
            .unwrap();
        assert_eq!(
            browser.current_url().await.unwrap(),
            format!("{}/new", mock_server.uri())
        );
    }

    #[tokio::test]
    async fn test_basic_auth_stays_on_its_origin() {
        let site = MockServer::start().await;
        let elsewhere = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header_exists("authorization"))
            .respond_with(html(&format!(
                r#"<html><body><a href="{}/pixel">Out</a></body></html>"#,
                elsewhere.uri()
            )))
            .expect(1)
            .mount(&site)
            .await;
        Mock::given(method("GET"))
            .and(header_exists("authorization"))
            .respond_with(html("<html><body>leaked</body></html>"))
            .expect(0)
            .mount(&elsewhere)
            .await;
        Mock::given(method("GET"))
            .and(path("/pixel"))
            .respond_with(html("<html><body>anonymous</body></html>"))
            .mount(&elsewhere)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        let origin = Url::parse(&site.uri()).unwrap();
        browser
            .set_basic_auth(BasicAuth::new(&origin, "admin", "secret"))
            .await
            .unwrap();
        browser.navigate(&format!("{}/", site.uri()), WaitPolicy::Load).await.unwrap();
        browser.click("body > a").await.unwrap();
        assert!(browser.content().await.unwrap().contains("anonymous"));
    }

    #[tokio::test]
    async fn test_slow_response_is_a_navigation_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(html("<html><body>late</body></html>").set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::builder()
            .with_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let err = browser
            .navigate(&format!("{}/slow", mock_server.uri()), WaitPolicy::Load)
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::NavigationTimeout(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_interceptor_short_circuits_requests() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<html><body>real</body></html>"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut browser = HttpBrowser::new().unwrap();
        browser
            .set_request_interceptor(Arc::new(|_: &InterceptedRequest| RequestDecision::Fulfill {
                status: 403,
                body: "<html><body>blocked</body></html>".to_string(),
            }))
            .await
            .unwrap();
        browser.navigate(&mock_server.uri(), WaitPolicy::Load).await.unwrap();
        assert!(browser.content().await.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn test_basic_auth_and_non_html() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{\"a\":1}"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let site = Url::parse(&mock_server.uri()).unwrap();
        let mut browser = HttpBrowser::new().unwrap();
        browser
            .set_basic_auth(BasicAuth::new(&site, "admin", "secret"))
            .await
            .unwrap();
        browser
            .navigate(&format!("{}/data.json", mock_server.uri()), WaitPolicy::Load)
            .await
            .unwrap();
        assert_eq!(browser.content().await.unwrap(), EMPTY_DOCUMENT);
    }
}
