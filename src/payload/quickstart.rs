//! Structured sample records with randomly drawn field values.

use rand::Rng;
use serde::Serialize;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuickstartKind {
    User,
    Book,
    Car,
    Address,
    Contact,
    Movie,
    Job,
}

impl FromStr for QuickstartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "book" => Ok(Self::Book),
            "car" => Ok(Self::Car),
            "address" => Ok(Self::Address),
            "contact" => Ok(Self::Contact),
            "movie" => Ok(Self::Movie),
            "job" => Ok(Self::Job),
            other => Err(other.to_string()),
        }
    }
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Linus", "Margaret", "Dennis", "Barbara", "Ken", "Frances", "Alan", "Radia",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Torvalds", "Hamilton", "Ritchie", "Liskov", "Thompson", "Allen",
    "Turing", "Perlman",
];
const GENDERS: &[&str] = &["female", "male"];
const HOBBIES: &[&str] = &["climbing", "chess", "baking", "cycling", "origami", "sailing"];
const COMPANIES: &[&str] = &["Initech", "Globex", "Umbrella", "Hooli", "Vandelay", "Acme"];
const JOB_TITLES: &[&str] = &["Engineer", "Analyst", "Designer", "Manager", "Architect"];
const JOB_DESCRIPTORS: &[&str] = &["Lead", "Senior", "Principal", "Junior", "Staff"];
const JOB_LEVELS: &[&str] = &["Solutions", "Operations", "Infrastructure", "Research"];
const CITIES: &[&str] = &["Lisbon", "Osaka", "Denver", "Tallinn", "Porto Alegre", "Busan"];
const STATES: &[&str] = &["Colorado", "Oregon", "Vermont", "Nevada", "Ohio"];
const STREETS: &[&str] = &["Maple Ave", "Harbor St", "Station Rd", "Mill Ln", "Quarry Way"];
const COUNTRIES: &[&str] = &["Portugal", "Japan", "United States", "Estonia", "Brazil", "Korea"];
const CARD_TYPES: &[&str] = &["Visa", "Mastercard", "Discover", "American Express"];
const BOOK_TITLES: &[&str] = &[
    "The Silent Compiler", "Borrowed Time", "Ownership", "A Lifetime of Pointers",
    "Zero Cost", "Fearless",
];
const BOOK_GENRES: &[&str] = &["Fantasy", "Mystery", "Thriller", "Science Fiction", "Memoir"];
const CAR_TYPES: &[&str] = &["Sedan", "Hatchback", "SUV", "Pickup", "Van"];
const CAR_FUELS: &[&str] = &["Gasoline", "Diesel", "Electric", "Hybrid"];
const CAR_TRANSMISSIONS: &[&str] = &["Manual", "Automatic"];
const CAR_BRANDS: &[&str] = &["Volvo", "Kia", "Subaru", "Skoda", "Mazda", "Fiat"];
const CAR_MODELS: &[&str] = &["Roadster", "Wagon", "Coupe", "Crossover", "Compact"];
const MOVIE_NAMES: &[&str] = &[
    "Heap Overflow", "The Last Mutex", "Race Condition", "Deadlock", "Segfault City",
];
const MOVIE_GENRES: &[&str] = &["Drama", "Comedy", "Horror", "Action", "Documentary"];
const EMAIL_DOMAINS: &[&str] = &["example.com", "example.org", "mail.test"];

fn pick<R: Rng + ?Sized>(rng: &mut R, table: &'static [&'static str]) -> String {
    table[rng.random_range(0..table.len())].to_string()
}

fn digits<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    (0..n)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
    pub ssn: String,
    pub hobby: String,
    pub job: Job,
    pub address: Address,
    pub contact: Contact,
    pub credit_card: CreditCard,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditCard {
    #[serde(rename = "type")]
    pub card_type: String,
    pub number: String,
    pub exp: String,
    pub cvv: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub genre: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Car {
    #[serde(rename = "type")]
    pub car_type: String,
    pub fuel: String,
    pub transmission: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Address {
    pub address: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Movie {
    pub name: String,
    pub genre: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub company: String,
    pub title: String,
    pub descriptor: String,
    pub level: String,
}

impl Job {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            company: pick(rng, COMPANIES),
            title: pick(rng, JOB_TITLES),
            descriptor: pick(rng, JOB_DESCRIPTORS),
            level: pick(rng, JOB_LEVELS),
        }
    }
}

impl Address {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let number = rng.random_range(1..9_999u32);
        let street = pick(rng, STREETS);
        let city = pick(rng, CITIES);
        let state = pick(rng, STATES);
        let zip = digits(rng, 5);
        Self {
            address: format!("{number} {street}, {city}, {state} {zip}"),
            street: format!("{number} {street}"),
            city,
            state,
            zip,
            country: pick(rng, COUNTRIES),
            latitude: rng.random_range(-90.0..90.0),
            longitude: rng.random_range(-180.0..180.0),
        }
    }
}

impl Contact {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let user = format!(
            "{}.{}",
            pick(rng, FIRST_NAMES).to_lowercase(),
            pick(rng, LAST_NAMES).to_lowercase()
        );
        Self {
            phone: digits(rng, 10),
            email: format!("{user}@{}", pick(rng, EMAIL_DOMAINS)),
        }
    }
}

impl Person {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            first_name: pick(rng, FIRST_NAMES),
            last_name: pick(rng, LAST_NAMES),
            gender: pick(rng, GENDERS),
            ssn: digits(rng, 9),
            hobby: pick(rng, HOBBIES),
            job: Job::random(rng),
            address: Address::random(rng),
            contact: Contact::random(rng),
            credit_card: CreditCard {
                card_type: pick(rng, CARD_TYPES),
                number: digits(rng, 16),
                exp: format!("{:02}/{:02}", rng.random_range(1..=12u8), rng.random_range(26..=35u8)),
                cvv: digits(rng, 3),
            },
        }
    }
}

impl Book {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            title: pick(rng, BOOK_TITLES),
            author: format!("{} {}", pick(rng, FIRST_NAMES), pick(rng, LAST_NAMES)),
            genre: pick(rng, BOOK_GENRES),
        }
    }
}

impl Car {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            car_type: pick(rng, CAR_TYPES),
            fuel: pick(rng, CAR_FUELS),
            transmission: pick(rng, CAR_TRANSMISSIONS),
            brand: pick(rng, CAR_BRANDS),
            model: pick(rng, CAR_MODELS),
            year: rng.random_range(1990..=2026),
        }
    }
}

impl Movie {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            name: pick(rng, MOVIE_NAMES),
            genre: pick(rng, MOVIE_GENRES),
        }
    }
}
