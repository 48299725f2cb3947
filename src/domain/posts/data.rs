use time::Date;
use time::macros::date;

/// Bundled demo content used by the in-memory store.
#[derive(Debug, Clone, Copy)]
pub struct SamplePost {
    pub title: &'static str,
    pub excerpt: &'static str,
    pub content: &'static str,
    pub author: &'static str,
    pub category: &'static str,
    pub tags: &'static [&'static str],
    pub featured: bool,
    pub published_on: Date,
}

pub static SAMPLE_POSTS: [SamplePost; 6] = [
    SamplePost {
        title: "AI in 2025: Trends to Watch for Business Transformation",
        excerpt: "Explore the latest AI trends that will revolutionize business operations in 2025, from generative AI to autonomous systems.",
        content: "Generative models have moved from pilots into production workflows. Teams now pair them with retrieval over their own documents, and autonomous agents are starting to handle routine operational tasks end to end.",
        author: "AKACorpTech Team",
        category: "Artificial Intelligence",
        tags: &["AI", "Machine Learning", "Business Strategy", "2025 Trends"],
        featured: true,
        published_on: date!(2024 - 12 - 15),
    },
    SamplePost {
        title: "Building Scalable React Applications: Best Practices",
        excerpt: "Learn essential techniques for building maintainable and scalable React applications that can grow with your business.",
        content: "Keep components small, colocate state with the views that own it, and push data fetching into a cache layer so screens stay declarative as the application grows.",
        author: "Dev Team",
        category: "Web Development",
        tags: &["React", "JavaScript", "Frontend", "Scalability"],
        featured: true,
        published_on: date!(2024 - 12 - 10),
    },
    SamplePost {
        title: "Blockchain Beyond Cryptocurrency: Real-World Applications",
        excerpt: "Discover how blockchain technology is transforming industries beyond finance, from supply chain to healthcare.",
        content: "Shared ledgers give supply chains a tamper-evident record of custody, and healthcare networks use them to track consent across providers without a single owner of the data.",
        author: "Blockchain Expert",
        category: "Blockchain",
        tags: &["Blockchain", "Cryptocurrency", "Supply Chain", "Healthcare"],
        featured: false,
        published_on: date!(2024 - 12 - 05),
    },
    SamplePost {
        title: "DevOps Best Practices for Startup Success",
        excerpt: "Essential DevOps strategies that can help startups deploy faster, scale efficiently, and maintain high-quality software.",
        content: "Automate the path from commit to production early. A reproducible pipeline and a small set of service-level objectives pay for themselves long before the first scaling crunch.",
        author: "DevOps Team",
        category: "DevOps",
        tags: &["DevOps", "CI/CD", "Startups", "Cloud"],
        featured: false,
        published_on: date!(2024 - 12 - 01),
    },
    SamplePost {
        title: "Cybersecurity in the Age of Remote Work",
        excerpt: "Protecting your business in a distributed workforce: essential security measures for remote teams.",
        content: "Assume the network is hostile. Enforce strong device posture, phishing-resistant authentication and least-privilege access for every remote session.",
        author: "Security Expert",
        category: "Cybersecurity",
        tags: &["Security", "Remote Work", "Privacy", "Data Protection"],
        featured: false,
        published_on: date!(2024 - 11 - 28),
    },
    SamplePost {
        title: "The Future of Mobile App Development",
        excerpt: "Exploring emerging technologies and frameworks that will shape mobile app development in the coming years.",
        content: "Cross-platform toolkits keep closing the gap with native code, while on-device inference opens up features that used to require a round trip to the cloud.",
        author: "Mobile Team",
        category: "Mobile Development",
        tags: &["Mobile", "Flutter", "React Native", "iOS", "Android"],
        featured: false,
        published_on: date!(2024 - 11 - 25),
    },
];
