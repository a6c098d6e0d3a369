//! The [`HttpProvider`] talks to the ad service REST API.
use std::time::Duration;

use adview_primitives::{
    api::{AdsResponse, SuccessResponse},
    Advertisement, AdvertisementId, PlacementKey,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use super::AdProvider;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Request to the ad service failed: status {status} at url {url}")]
    Status { status: StatusCode, url: Url },
    #[error("The ad service did not record the click at url {url}")]
    ClickRejected { url: Url },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("Building the endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// Always ends with `/`
    base_url: Url,
    client: Client,
}

impl HttpProvider {
    /// `timeout` is applied to every request made by the provider.
    pub fn new(mut base_url: Url, timeout: Duration) -> Result<Self, Error> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, endpoint: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(endpoint)?)
    }
}

#[async_trait]
impl AdProvider for HttpProvider {
    type Error = Error;

    async fn fetch_ads(&self, placement: &PlacementKey) -> Result<Vec<Advertisement>, Error> {
        let url = self.endpoint(&format!("placements/{placement}/ads"))?;

        let response = self.client.get(url.clone()).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<AdsResponse>().await?.ads),
            status => Err(Error::Status { status, url }),
        }
    }

    async fn report_click(&self, ad: &AdvertisementId) -> Result<(), Error> {
        let url = self.endpoint(&format!("ads/{ad}/click"))?;

        let response = self.client.post(url.clone()).send().await?;

        match response.status() {
            status if status.is_success() => {
                let SuccessResponse { success } = response.json().await?;

                if success {
                    Ok(())
                } else {
                    Err(Error::ClickRejected { url })
                }
            }
            status => Err(Error::Status { status, url }),
        }
    }
}
